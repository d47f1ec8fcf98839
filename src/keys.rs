use anyhow::{bail, Context};
use inquire::{Confirm, Text};
use log::{error, info, warn};

use crate::github::{CredentialStore, SshKeyRecord};

/// Print the 1-indexed key table.
fn print_table(keys: &[SshKeyRecord]) {
    for (position, key) in keys.iter().enumerate() {
        println!("{:>3}) {}  (id {})", position + 1, key.title, key.id);
    }
}

/// Parse a space-separated list of 1-based indices against a table of
/// `len` entries, preserving order.
pub fn parse_selection(input: &str, len: usize) -> anyhow::Result<Vec<usize>> {
    let mut picks = Vec::new();
    for word in input.split_whitespace() {
        let index: usize = word
            .parse()
            .with_context(|| format!("'{word}' is not a number"))?;
        if index < 1 || index > len {
            bail!("index {index} is out of range (1-{len})");
        }
        if !picks.contains(&(index - 1)) {
            picks.push(index - 1);
        }
    }
    if picks.is_empty() {
        bail!("nothing selected");
    }
    Ok(picks)
}

/// Find the record whose title exactly equals `title`. The store should
/// never hold duplicate titles; when it does anyway the first match (in
/// store order) wins, which is a documented limitation.
pub fn find_by_title<'a>(keys: &'a [SshKeyRecord], title: &str) -> Option<&'a SshKeyRecord> {
    let mut matches = keys.iter().filter(|k| k.title == title);
    let first = matches.next();
    if matches.next().is_some() {
        warn!("multiple keys share the title '{title}'; using the first");
    }
    first
}

/// Delete each selected key independently; one failure neither rolls back
/// nor stops the rest of the batch.
async fn delete_batch<C: CredentialStore>(store: &C, selected: &[&SshKeyRecord]) {
    for key in selected {
        match store.delete_key(key.id).await {
            Ok(()) => info!("Deleted '{}' (id {})", key.title, key.id),
            Err(e) => error!("Failed to delete '{}' (id {}): {e}", key.title, key.id),
        }
    }
}

fn confirm_or_abort(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let confirmed = Confirm::new(prompt)
        .with_default(false)
        .prompt()
        .context("confirmation aborted")?;
    if !confirmed {
        println!("Cancelled.");
    }
    Ok(confirmed)
}

pub async fn list<C: CredentialStore>(store: &C) -> anyhow::Result<()> {
    store.auth_status().await?;
    let keys = store.list_keys().await?;
    if keys.is_empty() {
        println!("No keys registered.");
    } else {
        print_table(&keys);
    }
    Ok(())
}

pub async fn delete_interactive<C: CredentialStore>(
    store: &C,
    assume_yes: bool,
) -> anyhow::Result<()> {
    store.auth_status().await?;
    let keys = store.list_keys().await?;
    if keys.is_empty() {
        println!("No keys registered.");
        return Ok(());
    }
    print_table(&keys);

    let input = Text::new("Keys to delete (space-separated indices):")
        .prompt()
        .context("selection aborted")?;
    let picks = parse_selection(&input, keys.len())?;
    let selected: Vec<&SshKeyRecord> = picks.iter().map(|&i| &keys[i]).collect();

    println!("Selected:");
    for key in &selected {
        println!("  {} (id {})", key.title, key.id);
    }
    if !confirm_or_abort("Delete the selected keys?", assume_yes)? {
        return Ok(());
    }
    delete_batch(store, &selected).await;
    Ok(())
}

pub async fn self_delete<C: CredentialStore>(
    store: &C,
    hostname: &str,
    assume_yes: bool,
) -> anyhow::Result<()> {
    store.auth_status().await?;
    let keys = store.list_keys().await?;
    let Some(key) = find_by_title(&keys, hostname) else {
        bail!("no key titled '{hostname}' is registered");
    };
    println!("Will delete '{}' (id {})", key.title, key.id);
    if !confirm_or_abort("Delete this key?", assume_yes)? {
        return Ok(());
    }
    delete_batch(store, &[key]).await;
    Ok(())
}

pub async fn delete_matching_prefix<C: CredentialStore>(
    store: &C,
    prefix: &str,
    assume_yes: bool,
) -> anyhow::Result<()> {
    store.auth_status().await?;
    let keys = store.list_keys().await?;
    let selected: Vec<&SshKeyRecord> = keys
        .iter()
        .filter(|k| k.title.starts_with(prefix))
        .collect();
    if selected.is_empty() {
        println!("No keys with the title prefix '{prefix}'.");
        return Ok(());
    }
    println!("Matching '{prefix}':");
    for key in &selected {
        println!("  {} (id {})", key.title, key.id);
    }
    if !confirm_or_abort("Delete all matching keys?", assume_yes)? {
        return Ok(());
    }
    delete_batch(store, &selected).await;
    Ok(())
}

/// Teardown helper: delete the key paired with a VM by exact title.
/// Returns whether a key was found and deleted.
pub async fn delete_by_title<C: CredentialStore>(store: &C, title: &str) -> anyhow::Result<bool> {
    let keys = store.list_keys().await?;
    match find_by_title(&keys, title) {
        Some(key) => {
            store.delete_key(key.id).await?;
            info!("Deleted key '{}' (id {})", key.title, key.id);
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, title: &str) -> SshKeyRecord {
        SshKeyRecord {
            id,
            title: title.to_string(),
            key: String::new(),
        }
    }

    #[test]
    fn selection_parses_one_based_indices() {
        assert_eq!(parse_selection("1 3 2", 3).unwrap(), vec![0, 2, 1]);
        assert_eq!(parse_selection(" 2 ", 4).unwrap(), vec![1]);
        assert_eq!(parse_selection("2 2 2", 4).unwrap(), vec![1]);
    }

    #[test]
    fn selection_rejects_garbage_and_out_of_range() {
        assert!(parse_selection("0", 3).is_err());
        assert!(parse_selection("4", 3).is_err());
        assert!(parse_selection("two", 3).is_err());
        assert!(parse_selection("", 3).is_err());
    }

    #[test]
    fn title_lookup_is_exact_not_prefix() {
        let keys = [record(1, "vm-a"), record(2, "vm-ab")];
        assert_eq!(find_by_title(&keys, "vm-a").unwrap().id, 1);
        assert_eq!(find_by_title(&keys, "vm-ab").unwrap().id, 2);
        assert!(find_by_title(&keys, "vm-").is_none());
    }

    #[test]
    fn duplicate_titles_resolve_to_the_first_match() {
        // The store invariant forbids this, but when it happens anyway the
        // first record in store order is the one acted on.
        let keys = [record(7, "vm-a"), record(8, "vm-a")];
        assert_eq!(find_by_title(&keys, "vm-a").unwrap().id, 7);
    }
}
