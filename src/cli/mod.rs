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

//! The command-line interface and everything it can be told to do.

// Only usable before logging is initialised or when we know we are talking
// to a terminal; otherwise use fatal! in serve so errors reach syslog.
macro_rules! die {
    ($ex:ident, $($stuff:tt)*) => {{
        eprintln!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub mod main;

mod send;
mod serve;

#[cfg(feature = "dev-tools")]
mod smtp_test;
