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
use std::io;
use std::net::{self, ToSocketAddrs};
use std::path::Path;

use log::info;

use super::main::ClientSubcommand;
use crate::smtp::client::Client;
use crate::support::error::Error;
use crate::support::sysexits::*;

pub(super) fn main(cmd: ClientSubcommand) {
    crate::init_simple_log();

    let ClientSubcommand::Send(cmd) = cmd;

    let helo_name = match cmd.common.helo_name {
        Some(ref name) => name.clone(),
        None => local_host_name(),
    };

    let address = match (&cmd.common.host as &str, cmd.common.port)
        .to_socket_addrs()
        .map(|mut addresses| addresses.next())
    {
        Ok(Some(address)) => address,
        Ok(None) => die!(EX_NOHOST, "Host not found: {}", cmd.common.host),
        Err(e) => {
            die!(EX_NOHOST, "Unable to resolve '{}': {}", cmd.common.host, e)
        }
    };

    for input in &cmd.inputs {
        if let Err(e) = send_file(address, &helo_name, input) {
            eprintln!("Failed to replay '{}': {}", input.display(), e);
            exit_for(&e).exit()
        }

        info!("Replayed '{}'", input.display());
    }
}

/// Replay one forward file over a connection of its own.
fn send_file(
    address: net::SocketAddr,
    helo_name: &str,
    input: &Path,
) -> Result<(), Error> {
    let records = match fs::File::open(input) {
        Ok(records) => records,
        Err(e) => {
            die!(EX_NOINPUT, "Unable to read '{}': {}", input.display(), e)
        }
    };

    let cxn = match net::TcpStream::connect(address) {
        Ok(cxn) => cxn,
        Err(e) => {
            die!(EX_UNAVAILABLE, "Unable to connect to {}: {}", address, e)
        }
    };

    let mut client = Client::new(
        io::BufReader::new(cxn.try_clone()?),
        cxn,
        io::BufReader::new(records),
        input.display().to_string(),
    );

    client.greet(helo_name)?;
    client.run()
}

fn exit_for(e: &Error) -> Sysexit {
    match e {
        Error::Io(..) => EX_IOERR,
        Error::InvalidReply(..) => EX_PROTOCOL,
        Error::Rejected { .. } | Error::BadRecord(..) => EX_DATAERR,
        Error::UnsafeName => EX_SOFTWARE,
    }
}

fn local_host_name() -> String {
    let mut buf = [0u8; 256];
    match nix::unistd::gethostname(&mut buf) {
        Ok(host_name_cstr) => match host_name_cstr.to_str() {
            Ok(host_name) => host_name.to_owned(),
            Err(_) => die!(EX_OSERR, "System host name is not UTF-8"),
        },
        Err(e) => die!(
            EX_OSERR,
            "Failed to determine host name; \
             pass --helo-name explicitly: {}",
            e
        ),
    }
}
