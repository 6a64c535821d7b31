use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pb_manage::config::{self, Config, Overrides};
use pb_manage::executor::{ExecCtx, StdoutSink};
use pb_manage::local::DockerCompose;
use pb_manage::remote::SshRemote;
use pb_manage::{BackupOptions, Invocation, Operation, Request, Result};

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage PocketBase environments on a remote host")]
struct Args {
    /// Path to the project config (JSON, or TOML by extension)
    #[arg(short = 'c', long, global = true, env = "PB_MANAGE_CONFIG")]
    config: Option<PathBuf>,
    /// SSH private key, overrides `sshKey` from the config
    #[arg(short = 'k', long, global = true, env = "PB_SSH_KEY")]
    ssh_key: Option<PathBuf>,
    /// Environment name used when the command has no positional name
    #[arg(short = 'e', long = "env", global = true)]
    env_name: Option<String>,
    /// backup: download the archive to this machine
    #[arg(long, global = true)]
    local: bool,
    /// backup: keep the remote archive after downloading
    #[arg(long, global = true)]
    remote: bool,
    /// backup: local destination for the downloaded archive
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// Print the steps without running any command
    #[arg(long, global = true)]
    dry_run: bool,
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an environment: data, container, migrations, seed and route
    Create { env: Option<String> },
    /// Remove an environment's container, data and route
    Destroy { env: Option<String> },
    /// Archive an environment's data (use --local to download it)
    Backup { env: Option<String> },
    /// Replace an environment's data with a local archive
    Restore {
        env: Option<String>,
        archive: Option<PathBuf>,
    },
    /// Copy an environment's data into the local project and restart it
    Pull { env: Option<String> },
    /// Create an environment and verify it is running
    Deploy { env: Option<String> },
    /// Print the ordered steps of an operation
    Plan {
        op: String,
        env: Option<String>,
        /// Print GraphViz dot instead of a linear plan
        #[arg(long)]
        dot: bool,
    },
    /// Print the resolved configuration
    Config,
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    match dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn dispatch(args: &Args) -> Result<()> {
    let (op, env, archive) = match &args.cmd {
        Command::Create { env } => (Operation::Create, env, None),
        Command::Destroy { env } => (Operation::Destroy, env, None),
        Command::Backup { env } => (Operation::Backup, env, None),
        Command::Restore { env, archive } => (Operation::Restore, env, archive.clone()),
        Command::Pull { env } => (Operation::Pull, env, None),
        Command::Deploy { env } => (Operation::Deploy, env, None),
        Command::Plan { op, env, dot } => {
            let request = request(args, op.parse()?, env.clone(), None);
            return cmd_plan(args, request, *dot);
        }
        Command::Config => return cmd_config(args),
    };
    cmd_run(args, request(args, op, env.clone(), archive))
}

fn request(args: &Args, op: Operation, env: Option<String>, archive: Option<PathBuf>) -> Request {
    Request {
        op,
        env: env.or_else(|| args.env_name.clone()),
        archive,
        backup: BackupOptions {
            download: args.local,
            keep_remote: args.remote,
            output: args.output.clone(),
        },
    }
}

fn load_config(args: &Args, cwd: &Path) -> Result<Config> {
    let path = config::config_path(args.config.as_deref(), cwd);
    Config::load(
        &path,
        &Overrides {
            ssh_key: args.ssh_key.clone(),
        },
    )
}

fn invocation(args: &Args, request: Request) -> Result<Invocation> {
    // Argument errors win over config errors and never reach the remote.
    request.validate()?;
    let cwd = std::env::current_dir()?;
    let config = load_config(args, &cwd)?;
    Invocation::build(request, config, cwd)
}

fn cmd_run(args: &Args, request: Request) -> Result<()> {
    let inv = invocation(args, request)?;
    let mut ctx = ExecCtx::new(
        args.dry_run,
        Arc::new(StdoutSink::default()),
        Arc::new(SshRemote::new(&inv.config)),
        Arc::new(DockerCompose),
    );
    pb_manage::modules::run(&inv, &mut ctx)?;

    for (key, value) in ctx.report().iter() {
        println!("{key}: {value}");
    }
    Ok(())
}

fn cmd_plan(args: &Args, request: Request, dot: bool) -> Result<()> {
    let inv = invocation(args, request)?;
    let plan = pb_manage::modules::build_plan(&inv)?;

    if dot {
        print!("{}", plan.to_dot()?);
        return Ok(());
    }

    for (i, task) in plan.ordered()?.iter().enumerate() {
        println!(
            "{:>2}. {:<22}  {:<8} {:<10}  {}",
            i + 1,
            task.id,
            task.module,
            task.phase,
            task.label
        );
    }
    Ok(())
}

fn cmd_config(args: &Args) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config = load_config(args, &cwd)?;
    let pretty = serde_json::to_string_pretty(&config.to_json())?;
    println!("{pretty}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_match_long_ones() {
        let args = Args::try_parse_from([
            "pb-manage", "-c", "ops/pb.config.json", "-k", "/keys/pb", "-e", "qa", "backup",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("ops/pb.config.json")));
        assert_eq!(args.ssh_key, Some(PathBuf::from("/keys/pb")));
        assert_eq!(args.env_name.as_deref(), Some("qa"));
        assert!(matches!(args.cmd, Command::Backup { env: None }));
    }
}
