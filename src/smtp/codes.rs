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

//! The reply codes in use, and the reply-line validator the client runs on
//! everything the server sends back.
//!
//! The module is designed to be wildcard-imported, and defines a submodule
//! with a short name for accessing the enum values in a consistent way.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ReplyCode {
    ServiceReady = 220,
    ServiceClosing = 221,
    Ok = 250,
    StartMailInput = 354,
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    BadSequenceOfCommands = 503,
}

pub mod rc {
    pub use super::ReplyCode::*;
}

/// Validate a raw reply line and extract its code.
///
/// A reply is acceptable if, with the line terminator removed, it is at least
/// 5 characters long and its 4th character is a space or tab. On success the
/// leading 3 characters are returned; the digits themselves are not
/// inspected, so the caller's comparison against the codes it expects is
/// what actually accepts or rejects the reply. `None` compares equal to no
/// expected code and so always takes the caller's error path.
pub fn reply_code(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(|c| '\r' == c || '\n' == c);
    let bytes = line.as_bytes();
    if bytes.len() < 5 || (b' ' != bytes[3] && b'\t' != bytes[3]) {
        return None;
    }

    line.get(..3)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_code_extraction() {
        assert_eq!(Some("250"), reply_code("250 OK\r\n"));
        assert_eq!(Some("250"), reply_code("250 OK\n"));
        assert_eq!(Some("221"), reply_code("221 closing connection\n"));
        assert_eq!(Some("354"), reply_code("354\tgo ahead\n"));
        // Codes are extracted, not checked; "abc" simply never matches
        // anything a caller expects.
        assert_eq!(Some("abc"), reply_code("abc d\n"));

        assert_eq!(None, reply_code("25 OK\n"));
        assert_eq!(None, reply_code("250\n"));
        assert_eq!(None, reply_code("250 \n"));
        assert_eq!(None, reply_code("250 \r\n"));
        assert_eq!(None, reply_code("2500K\n"));
        assert_eq!(None, reply_code("\n"));
        assert_eq!(None, reply_code(""));
    }
}
