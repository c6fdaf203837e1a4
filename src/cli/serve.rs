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

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use crate::smtp::server::Server;
use crate::spool::Spool;
use crate::support::system_config::SystemConfig;

const STDIN: RawFd = 0;
const STDOUT: RawFd = 1;

// Need to use a this and not die! so that errors go to syslog/etc
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub fn serve(system_config: SystemConfig, system_root: PathBuf) {
    let host_name = host_name(&system_config);
    let spool = open_spool(&system_config, &system_root);

    let listener = match TcpListener::bind(&system_config.smtp.listen) {
        Ok(listener) => listener,
        Err(e) => fatal!(
            EX_UNAVAILABLE,
            "Unable to bind '{}': {}",
            system_config.smtp.listen,
            e
        ),
    };

    info!("Listening on {}", system_config.smtp.listen);

    loop {
        let (stream_in, origin) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        // Mostly one-line commands and one-line replies, so don't batch
        // them up.
        let _ = stream_in.set_nodelay(true);

        let stream_out = match stream_in.try_clone() {
            Ok(stream_out) => stream_out,
            Err(e) => {
                warn!("{} Unable to duplicate socket handle: {}", origin, e);
                continue;
            }
        };

        let mut server = Server::new(
            io::BufReader::new(stream_in),
            io::BufWriter::new(stream_out),
            Arc::clone(&spool),
            host_name.clone(),
            origin.to_string(),
        );

        std::thread::spawn(move || {
            info!("{} Accepted connection", origin);

            match server.run() {
                Ok(_) => info!("{} Connection closed normally", origin),
                Err(e) => warn!("{} Connection error: {}", origin, e),
            }
        });
    }
}

pub fn serve_stdio(system_config: SystemConfig, system_root: PathBuf) {
    let host_name = host_name(&system_config);
    let spool = open_spool(&system_config, &system_root);
    let peer_name = configure_stdio();

    let mut server = Server::new(
        io::BufReader::new(Stdio),
        io::BufWriter::new(Stdio),
        spool,
        host_name,
        peer_name.clone(),
    );

    match server.run() {
        Ok(_) => info!("{} Normal client disconnect", peer_name),
        Err(e) => warn!("{} Abnormal client disconnect: {}", peer_name, e),
    }
}

fn host_name(system_config: &SystemConfig) -> String {
    if system_config.smtp.host_name.is_empty() {
        let mut buf = [0u8; 256];
        let host_name_cstr = nix::unistd::gethostname(&mut buf)
            .unwrap_or_else(|e| {
                fatal!(
                    EX_OSERR,
                    "Failed to determine host name; you may \
                     need to explicitly configure it: {}",
                    e
                )
            });
        host_name_cstr
            .to_str()
            .unwrap_or_else(|_| {
                fatal!(EX_OSERR, "System host name is not UTF-8")
            })
            .to_owned()
    } else {
        system_config.smtp.host_name.clone()
    }
}

fn open_spool(
    system_config: &SystemConfig,
    system_root: &Path,
) -> Arc<Spool> {
    let spool_dir = system_root.join(&system_config.smtp.spool_dir);
    match Spool::new(spool_dir.clone()) {
        Ok(spool) => Arc::new(spool),
        Err(e) => fatal!(
            EX_CANTCREAT,
            "Unable to open spool at '{}': {}",
            spool_dir.display(),
            e
        ),
    }
}

fn configure_stdio() -> String {
    match (nix::unistd::isatty(STDIN), nix::unistd::isatty(STDOUT)) {
        (Ok(true), _) | (_, Ok(true)) => {
            // In this case, we *do* want to use die!() since we're on a
            // terminal.
            die!(EX_USAGE, "stdin and stdout must not be a terminal")
        }
        _ => (),
    }

    let mut peer_name = match nix::sys::socket::getpeername(STDIN) {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            warn!("Unable to determine peer name: {}", e);
            "unknown-socket".to_owned()
        }
    };

    // On FreeBSD, getpeername() on a UNIX socket returns "@\0", which breaks
    // syslog if we log that.
    if peer_name.contains("\0") {
        peer_name = "unknown-socket".to_owned();
    }

    // It is not unusual for stdio to be UNIX sockets instead of TCP, so don't
    // complain if setting TCP_NODELAY fails.
    let _ = nix::sys::socket::setsockopt(
        STDOUT,
        nix::sys::socket::sockopt::TcpNoDelay,
        &true,
    );

    info!("{} Connection established", peer_name);
    peer_name
}

// Read and write to the stdio FDs without buffering
#[derive(Debug)]
struct Stdio;

impl Read for Stdio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(STDIN, buf).map_err(|e| {
            io::Error::from_raw_os_error(e.as_errno().unwrap() as i32)
        })
    }
}

impl Write for Stdio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        nix::unistd::write(STDOUT, buf).map_err(|e| {
            io::Error::from_raw_os_error(e.as_errno().unwrap() as i32)
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
