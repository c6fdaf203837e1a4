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
use std::net::TcpListener;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::smtp::server::Server;
use crate::spool::Spool;

pub fn smtp_test() {
    crate::init_simple_log();

    let system_root: PathBuf =
        format!("/tmp/mailferrytest.{}", nix::unistd::getpid()).into();

    fs::DirBuilder::new()
        .mode(0o700)
        .create(&system_root)
        .expect(&format!("Failed to create {}", system_root.display()));

    let spool = Arc::new(
        Spool::new(system_root.join("spool"))
            .expect("Failed to set spool up"),
    );

    let listener = TcpListener::bind("127.0.0.1:2525")
        .expect("Failed to bind listener socket");

    info!("Initialised successfully.");
    info!(
        "Connect to: localhost:2525; mail spools under {}",
        system_root.display()
    );

    loop {
        let (stream_in, origin) =
            listener.accept().expect("Failed to listen for connections");

        let stream_out = stream_in
            .try_clone()
            .expect("Failed to duplicate socket handle");
        let mut server = Server::new(
            io::BufReader::new(stream_in),
            io::BufWriter::new(stream_out),
            Arc::clone(&spool),
            "localhost".to_owned(),
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
