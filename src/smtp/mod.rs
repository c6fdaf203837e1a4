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

//! Both halves of the mail transfer protocol.
//!
//! `server` accepts commands from a peer and files each completed mail
//! cycle into the domain spool. `client` is its mirror image, walking a
//! forward file record by record and narrating each one to a remote server
//! as a command sequence. `syntax` and `codes` hold the command grammar and
//! reply codes they share.

pub mod client;
pub mod codes;
pub mod server;
pub mod syntax;
