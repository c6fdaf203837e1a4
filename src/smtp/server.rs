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

//! The receiving half of the mail transfer protocol.
//!
//! One `Server` drives one connection: it sends the greeting, then consumes
//! command lines and produces exactly one reply per line until QUIT or the
//! stream ends. Accepted mail accumulates in the current cycle's buffer and
//! is handed to the spool when the data terminator arrives.

use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use log::{debug, info};

use super::codes::{rc, ReplyCode};
use super::syntax::{parse_command, Command, SyntaxErrorKind};
use crate::spool::{DomainSet, Spool};
use crate::support::error::Error;

const MAX_LINE: usize = 1024;

const RESP_OK: &str = "OK";
const RESP_START_DATA: &str = "Start mail input; end with <CRLF>.<CRLF>";
const RESP_CLOSING: &str = "Service closing transmission channel";
const RESP_BAD_COMMAND: &str = "Syntax error: command unrecognized";
const RESP_BAD_PARAMETER: &str = "Syntax error in parameters or arguments";
const RESP_BAD_SEQUENCE: &str = "Bad sequence of commands";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Nothing accepted yet but the connection itself.
    AwaitGreeting,
    /// Awaiting MAIL FROM. The cycle state is empty.
    MailFrom,
    /// Awaiting RCPT TO, more RCPT TO, or DATA.
    RcptTo,
    /// Consuming raw message lines up to the lone-dot terminator.
    Data,
}

/// One mail transaction in progress.
///
/// Created fresh every time the session enters the MailFrom state and
/// dropped wholesale when it leaves the cycle early.
#[derive(Default)]
struct Cycle {
    sender: String,
    buffer: Vec<u8>,
    domains: DomainSet,
    recipients: usize,
}

pub struct Server {
    read: Box<dyn BufRead + Send>,
    write: Box<dyn Write + Send>,
    spool: Arc<Spool>,
    host_name: String,
    log_prefix: String,
    state: State,
    cycle: Cycle,
    quit: bool,
}

impl Server {
    pub fn new<R: BufRead + Send + 'static, W: Write + Send + 'static>(
        read: R,
        write: W,
        spool: Arc<Spool>,
        host_name: String,
        log_prefix: String,
    ) -> Self {
        Server {
            read: Box::new(read),
            write: Box::new(write),
            spool,
            host_name,
            log_prefix,
            state: State::AwaitGreeting,
            cycle: Cycle::default(),
            quit: false,
        }
    }

    /// Run the session.
    ///
    /// Blocks until QUIT has been answered or an I/O fault (including the
    /// peer dropping the connection) ends the session.
    pub fn run(&mut self) -> Result<(), Error> {
        self.send_reply(
            rc::ServiceReady,
            &format!("{} Simple Mail Transfer Service Ready", self.host_name),
        )?;

        let mut line = Vec::<u8>::new();
        while !self.quit {
            let full = self.buffer_next_line(&mut line)?;

            if State::Data == self.state {
                // Raw message content; an overlong line keeps its truncated
                // prefix and loses the rest.
                self.data_line(&line)?;
                continue;
            }

            if !full {
                // A line this long cannot be one of the recognized commands.
                self.send_reply(rc::CommandSyntaxError, RESP_BAD_COMMAND)?;
                continue;
            }

            self.run_command(&line)?;
        }

        Ok(())
    }

    /// Read the next line into `line`, replacing its contents.
    ///
    /// Both DOS newlines and sane newlines are accepted; the terminator is
    /// removed. Returns `true` for a complete line. If the line exceeds
    /// `MAX_LINE`, the remainder of the physical line is discarded and
    /// `false` is returned with the truncated prefix left in `line`.
    ///
    /// If EOF is reached before a terminator, returns an `UnexpectedEof`
    /// IO error.
    fn buffer_next_line(&mut self, line: &mut Vec<u8>) -> Result<bool, Error> {
        line.clear();
        let nread = self
            .read
            .by_ref()
            .take(MAX_LINE as u64)
            .read_until(b'\n', line)?;

        if 0 == nread {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before reading full line",
            )));
        }

        if !line.ends_with(b"\n") {
            if nread < MAX_LINE {
                // Not the length cap; the stream ended mid-line.
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached before reading full line",
                )));
            }

            self.discard_line_tail()?;
            return Ok(false);
        }

        // Drop ending LF
        line.pop();
        // If there's an ending CR, drop that too
        if line.ends_with(b"\r") {
            line.pop();
        }

        Ok(true)
    }

    /// Discard input up to and including the next LF.
    fn discard_line_tail(&mut self) -> Result<(), Error> {
        let mut junk = Vec::<u8>::new();
        loop {
            junk.clear();
            let nread = self
                .read
                .by_ref()
                .take(MAX_LINE as u64)
                .read_until(b'\n', &mut junk)?;
            if 0 == nread || junk.ends_with(b"\n") {
                return Ok(());
            }
        }
    }

    fn run_command(&mut self, line: &[u8]) -> Result<(), Error> {
        let line = String::from_utf8_lossy(line);
        match parse_command(&line) {
            Ok(command) => self.apply_command(command),
            Err(e) => {
                debug!(
                    "{} Rejecting line: {} failed at {:?}",
                    self.log_prefix, e.rule, e.remainder
                );
                match e.kind {
                    SyntaxErrorKind::BadCommand => self.send_reply(
                        rc::CommandSyntaxError,
                        RESP_BAD_COMMAND,
                    ),
                    SyntaxErrorKind::BadParameter => self.send_reply(
                        rc::ParameterSyntaxError,
                        RESP_BAD_PARAMETER,
                    ),
                }
            }
        }
    }

    fn apply_command(&mut self, command: Command) -> Result<(), Error> {
        match (self.state, command) {
            // QUIT is the one command legal in every state.
            (_, Command::Quit) => {
                self.send_reply(rc::ServiceClosing, RESP_CLOSING)?;
                self.quit = true;
                Ok(())
            },

            (State::AwaitGreeting, Command::Hello(domain)) => {
                self.enter_mail_from();
                self.send_reply(rc::Ok, &format!("Hello {}", domain))
            },
            // Nothing else may proceed before the greeting exchange.
            (State::AwaitGreeting, _) => {
                self.send_reply(rc::BadSequenceOfCommands, RESP_BAD_SEQUENCE)
            },

            (State::MailFrom, Command::MailFrom(sender)) => {
                self.cycle
                    .buffer
                    .extend_from_slice(format!("From: <{}>\n", sender).as_bytes());
                self.cycle.sender = sender.to_string();
                self.state = State::RcptTo;
                self.send_reply(rc::Ok, RESP_OK)
            },

            (State::RcptTo, Command::RcptTo(recipient)) => {
                self.cycle
                    .buffer
                    .extend_from_slice(format!("To: <{}>\n", recipient).as_bytes());
                self.cycle.domains.insert(&recipient.domain);
                self.cycle.recipients += 1;
                self.send_reply(rc::Ok, RESP_OK)
            },

            (State::RcptTo, Command::Data) if self.cycle.recipients > 0 => {
                self.state = State::Data;
                self.send_reply(rc::StartMailInput, RESP_START_DATA)
            },

            // A well-formed command in the wrong place abandons the cycle
            // and starts over.
            (State::MailFrom, _) | (State::RcptTo, _) => {
                self.send_reply(rc::BadSequenceOfCommands, RESP_BAD_SEQUENCE)?;
                self.enter_mail_from();
                Ok(())
            },

            // Raw data lines never reach command dispatch.
            (State::Data, _) => unreachable!(),
        }
    }

    fn data_line(&mut self, line: &[u8]) -> Result<(), Error> {
        if &b"."[..] == line {
            self.finish_data()
        } else {
            self.cycle.buffer.extend_from_slice(line);
            self.cycle.buffer.push(b'\n');
            Ok(())
        }
    }

    fn finish_data(&mut self) -> Result<(), Error> {
        self.spool.append(&self.cycle.domains, &self.cycle.buffer)?;

        let domain_list =
            self.cycle.domains.iter().collect::<Vec<_>>().join(", ");
        info!(
            "{} Spooled mail from <{}> for {} recipient(s) to [{}]",
            self.log_prefix,
            self.cycle.sender,
            self.cycle.recipients,
            domain_list,
        );

        self.send_reply(rc::Ok, RESP_OK)?;
        self.enter_mail_from();
        Ok(())
    }

    fn enter_mail_from(&mut self) {
        self.state = State::MailFrom;
        self.cycle = Cycle::default();
    }

    fn send_reply(
        &mut self,
        code: ReplyCode,
        text: &str,
    ) -> Result<(), Error> {
        debug!("{} >> {} {}", self.log_prefix, code as u16, text);
        write!(self.write, "{} {}\r\n", code as u16, text)?;
        self.write.flush()?;
        Ok(())
    }
}
