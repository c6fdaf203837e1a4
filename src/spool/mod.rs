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

//! The forward spool.
//!
//! Each destination domain has one append-only file under the spool root,
//! named after the domain itself. A file accumulates the mail records bound
//! for that domain until a relay drains it.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use log::warn;

use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

/// The destination domains collected from the forward paths of one mail
/// transaction.
///
/// Iteration yields each domain once, in the order it was first seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    pub fn new() -> Self {
        DomainSet(Vec::new())
    }

    pub fn insert(&mut self, domain: &str) {
        if !self.0.iter().any(|d| d == domain) {
            self.0.push(domain.to_owned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

/// Handle on the spool directory.
///
/// One `Spool` is shared by every connection a server process handles; the
/// internal lock keeps records from separate connections from interleaving
/// within a domain file.
pub struct Spool {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl Spool {
    /// Opens the spool rooted at `root`, creating the directory if it does
    /// not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Spool {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Appends one copy of `record` to the file of every domain in
    /// `domains`.
    ///
    /// A domain whose name cannot safely be used as a file name is logged
    /// and skipped without affecting the other domains. I/O failure is
    /// returned to the caller.
    pub fn append(
        &self,
        domains: &DomainSet,
        record: &[u8],
    ) -> Result<(), Error> {
        let _lock = self.write_lock.lock().unwrap();
        for domain in domains.iter() {
            match self.append_one(domain, record) {
                Ok(()) => (),
                Err(Error::UnsafeName) => {
                    warn!(
                        "Not spooling for unusable domain name {:?}",
                        domain
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn append_one(&self, domain: &str, record: &[u8]) -> Result<(), Error> {
        if !is_safe_name(domain) {
            return Err(Error::UnsafeName);
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .mode(0o600)
            .open(self.root.join(domain))?;
        file.write_all(record)?;
        Ok(())
    }
}
