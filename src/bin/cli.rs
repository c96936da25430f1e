//! Command-line surface of the `redcat` binary.
//!
//! Establishes the transport (listen for a reverse shell or connect to a
//! bind shell), prepares the session, and dispatches one subcommand against
//! the facade. Interactive terminal handling lives above this layer.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use redcat_channel::TcpChannel;
use redcat_session::{Session, SessionError};

#[derive(Parser)]
#[command(name = "redcat", version, about = "Drive a degraded remote shell like a filesystem")]
struct Cli {
    /// Listen on this port for a reverse shell
    #[arg(short, long, value_name = "PORT", conflicts_with = "connect")]
    listen: Option<u16>,

    /// Connect to a bind shell at host:port
    #[arg(short, long, value_name = "ADDR")]
    connect: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command on the remote host and print its output
    Exec {
        /// The shell command to run
        command: String,
    },
    /// Download a remote file
    Get {
        /// Remote source path
        remote: String,
        /// Local destination path
        local: PathBuf,
    },
    /// Upload a local file
    Put {
        /// Local source path
        local: PathBuf,
        /// Remote destination path
        remote: String,
    },
    /// Print a remote environment variable
    Env {
        /// Variable name
        name: String,
    },
}

pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match drive(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("redcat: {err}");
            exit_code_for(&err)
        }
    }
}

fn drive(cli: Cli) -> Result<(), SessionError> {
    let channel = match (cli.listen, cli.connect.as_deref()) {
        (Some(port), None) => TcpChannel::listen(("0.0.0.0", port))?,
        (None, Some(addr)) => TcpChannel::connect(addr)?,
        _ => {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "exactly one of --listen or --connect is required",
            )));
        }
    };

    let session = Session::new(channel)?;
    session.prepare()?;

    match cli.command {
        Command::Exec { command } => {
            let output = session.run(&command)?;
            io::stdout().write_all(&output).map_err(SessionError::Io)?;
        }
        Command::Get { remote, local } => {
            let mut sink = File::create(&local).map_err(SessionError::Io)?;
            let mut source = session.open_read(&remote, true)?;
            io::copy(&mut source, &mut sink).map_err(SessionError::Io)?;
            source.close().map_err(SessionError::Io)?;
        }
        Command::Put { local, remote } => {
            let mut source = File::open(&local).map_err(SessionError::Io)?;
            let length = source.metadata().map_err(SessionError::Io)?.len();
            let mut sink = session.open_write(&remote, true, Some(length))?;
            io::copy(&mut source, &mut sink).map_err(SessionError::Io)?;
            sink.close().map_err(SessionError::Io)?;
        }
        Command::Env { name } => {
            println!("{}", session.getenv(&name)?);
        }
    }

    Ok(())
}

fn exit_code_for(err: &SessionError) -> ExitCode {
    let code: u8 = match err {
        SessionError::Io(_) => 2,
        SessionError::NotFound(_) => 3,
        SessionError::PermissionDenied(_) | SessionError::IsADirectory(_) => 4,
        SessionError::NoTransferMethod(_) => 5,
        SessionError::Catalog(_) => 6,
        SessionError::PasswordRequired { .. } | SessionError::AuthenticationFailed { .. } => 7,
        SessionError::ChannelPoisoned => 8,
    };
    ExitCode::from(code)
}
