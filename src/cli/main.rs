//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mailferry.
//
// Mailferry is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of  the License, or (at your option)
// any later version.
//
// Mailferry is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the GNU  General Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// Mailferry. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Commands which connect to a remote mail server.
    Client(ClientSubcommand),
    /// Commands to be run on the Mailferry server system.
    Server(ServerSubcommand),
    /// Commands used in the development or testing of Mailferry.
    #[cfg(feature = "dev-tools")]
    Dev(DevSubcommand),
}

#[cfg(feature = "dev-tools")]
#[derive(StructOpt)]
enum DevSubcommand {
    /// Run Mailferry in a scratch environment for testing.
    ///
    /// In this mode, Mailferry will listen for TCP connections on port 2525
    /// and spool whatever is delivered under a fresh directory in /tmp. All
    /// connections are handled in one process.
    ///
    /// There is no way to configure this.
    SmtpTest,
}

#[derive(StructOpt, Default)]
pub(super) struct ServerCommonOptions {
    /// The directory containing `mailferry.toml` etc
    /// [default: /etc/mailferry or /usr/local/etc/mailferry]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
enum ServerSubcommand {
    /// Accept SMTP connections and spool the mail they carry.
    ///
    /// This runs a foreground TCP listener which handles every connection in
    /// one process. It is the main way to run Mailferry in production.
    Serve(ServerCommonOptions),
    /// Serve a single SMTP session over standard IO.
    ///
    /// This is intended to be used with inetd, xinetd, etc.
    ServeStdio(ServerCommonOptions),
}

impl ServerSubcommand {
    fn common_options(&mut self) -> ServerCommonOptions {
        match *self {
            ServerSubcommand::Serve(ref mut c) => mem::take(c),
            ServerSubcommand::ServeStdio(ref mut c) => mem::take(c),
        }
    }
}

#[derive(StructOpt, Default)]
pub(super) struct ClientCommonOptions {
    /// The host to connect to
    #[structopt(long, short)]
    pub(super) host: String,
    /// The port to connect to
    #[structopt(long, short, default_value = "25")]
    pub(super) port: u16,
    /// The domain name to introduce ourselves as
    /// [default: the system host name]
    #[structopt(long)]
    pub(super) helo_name: Option<String>,
}

#[derive(StructOpt)]
pub(super) enum ClientSubcommand {
    /// Replay forward files to a remote SMTP server.
    ///
    /// Each input file is sent over a connection of its own. A forward file
    /// is a sequence of mail records: a `From: <address>` line, one or more
    /// `To: <address>` lines, then the content lines. A record ends at a
    /// line holding only `.`, at the next `From:` line, or at the end of the
    /// file.
    ///
    /// Replay stops at the first record the server refuses. Anything the
    /// server accepted before that point stays accepted; running the same
    /// file again will deliver those records a second time.
    Send(ClientSendSubcommand),
}

#[derive(StructOpt)]
pub(super) struct ClientSendSubcommand {
    #[structopt(flatten)]
    pub(super) common: ClientCommonOptions,

    /// The forward files to replay.
    #[structopt(parse(from_os_str), required = true)]
    pub(super) inputs: Vec<PathBuf>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        #[cfg(feature = "dev-tools")]
        Command::Dev(DevSubcommand::SmtpTest) => super::smtp_test::smtp_test(),
        Command::Client(cmd) => super::send::main(cmd),
        Command::Server(cmd) => server(cmd),
    }
}

fn server(mut cmd: ServerSubcommand) {
    let common = cmd.common_options();
    let root = common.root.unwrap_or_else(|| {
        if Path::new("/etc/mailferry/mailferry.toml").is_file() {
            "/etc/mailferry".to_owned().into()
        } else if Path::new("/usr/local/etc/mailferry/mailferry.toml")
            .is_file()
        {
            "/usr/local/etc/mailferry".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/mailferry nor /usr/local/etc/mailferry looks\n\
                 like the Mailferry root; use --root=/path/to/mailferry if\n\
                 your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config_path = root.join("mailferry.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        eprintln!("Error reading '{}': {}", system_config_path.display(), e);
        EX_CONFIG.exit();
    }

    let system_config: SystemConfig =
        match toml::from_slice(&system_config_toml) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    system_config_path.display(),
                    e
                );
                EX_CONFIG.exit()
            }
        };

    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
    } else {
        // Right now we have this awkward situation where you can use log4rs *or*
        // syslog, because log4rs-syslog hasn't been updated in quite a while.
        //
        // If anything goes wrong, we don't really have a way to recover since
        // inetd sends even stderr back to the client.
        let log_config_file = root.join("logging.toml");
        if log_config_file.is_file() {
            log4rs::init_file(
                log_config_file,
                log4rs::file::Deserializers::new(),
            )
            .expect("Failed to initialise logging");
        } else {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_MAIL,
                hostname: None,
                process: env!("CARGO_PKG_NAME").to_owned(),
                pid: nix::unistd::getpid().as_raw(),
            };

            let logger =
                syslog::unix(formatter).expect("Failed to connect to syslog");
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
                .expect("Failed to initialise logging");
        }
    }

    match cmd {
        ServerSubcommand::Serve(_) => {
            super::serve::serve(system_config, root);
        }
        ServerSubcommand::ServeStdio(_) => {
            super::serve::serve_stdio(system_config, root);
        }
    }
}
