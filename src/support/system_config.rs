//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mailferry.
//
// Mailferry is free software: you can redistribute it and/or modify it under
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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mailferry.
///
/// This is stored in a file named `mailferry.toml` under the Mailferry system
/// root, which is typically `/usr/local/etc/mailferry` or `/etc/mailferry`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Configuration shared by the SMTP server and client.
    ///
    /// The defaults are reasonable for local testing.
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// The host name to report as.
    ///
    /// The server puts this in its greeting; the client sends it in HELO.
    /// If unset, the system host name is used.
    pub host_name: String,

    /// The address the TCP server binds.
    pub listen: String,

    /// The directory mailbox files are appended under, one file per
    /// destination domain.
    ///
    /// A relative path is resolved against the system root.
    pub spool_dir: PathBuf,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            host_name: String::new(),
            listen: "127.0.0.1:2525".to_owned(),
            spool_dir: PathBuf::from("spool"),
        }
    }
}
