use clap::Parser;
use log::{error, warn};

use vbclone::cli::{Cli, CloneArgs, Command, KeysArgs, TeardownArgs};
use vbclone::config::RunConfig;
use vbclone::exec::Executor;
use vbclone::github::{GithubClient, GithubError};
use vbclone::guestkey::short_hostname;
use vbclone::ssh::{Auth, OpenSsh};
use vbclone::teardown::TeardownOpts;
use vbclone::vbox::VBoxManage;
use vbclone::{keys, provision, teardown, EXIT_AUTH};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(&cli);

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn init_logger(cli: &Cli) {
    let debug = matches!(&cli.command, Command::Clone(args) if args.debug);
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<GithubError>() {
        Some(GithubError::Unauthenticated) => EXIT_AUTH,
        _ => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Clone(args) => cmd_clone(args).await,
        Command::Teardown(args) => cmd_teardown(args).await,
        Command::Keys(args) => cmd_keys(args).await,
    }
}

async fn cmd_clone(args: CloneArgs) -> anyhow::Result<()> {
    let cfg = RunConfig::from_args(&args)?;
    if args.print_vars {
        println!("{}", cfg.render_vars()?);
        return Ok(());
    }

    let executor = Executor::new(cfg.dry_run, cfg.debug);
    let hypervisor = VBoxManage::new(executor);
    let auth = if cfg.use_sshpass {
        Auth::Password(cfg.password.clone())
    } else {
        Auth::Key
    };
    let shell = OpenSsh::new(&cfg.user, auth, executor);

    provision::run_pipeline(&cfg, &hypervisor, &shell).await
}

async fn cmd_teardown(args: TeardownArgs) -> anyhow::Result<()> {
    let opts = TeardownOpts {
        filter: args.filter.clone(),
        github_delete: !args.no_github_delete,
        dry_run: args.dry_run,
        force: args.force,
    };

    let store = if opts.github_delete {
        match GithubClient::from_env() {
            Ok(client) => Some(client),
            // An explicit --github-delete insists on a session; the
            // default pairing degrades to a warning.
            Err(e) if args.github_delete => return Err(e.into()),
            Err(_) => {
                warn!("no GitHub session; paired key deletion will be skipped");
                None
            }
        }
    } else {
        None
    };

    let executor = Executor::new(opts.dry_run, false);
    let hypervisor = VBoxManage::new(executor);
    teardown::run(&opts, &hypervisor, store.as_ref()).await
}

async fn cmd_keys(args: KeysArgs) -> anyhow::Result<()> {
    let store = GithubClient::from_env()?;
    if args.list {
        keys::list(&store).await
    } else if args.delete {
        keys::delete_interactive(&store, args.yes).await
    } else if args.self_delete {
        keys::self_delete(&store, &short_hostname(), args.yes).await
    } else if let Some(prefix) = &args.match_prefix {
        keys::delete_matching_prefix(&store, prefix, args.yes).await
    } else {
        unreachable!("clap requires exactly one keys operation");
    }
}
