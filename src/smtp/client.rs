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

//! The sending half of the mail transfer protocol.
//!
//! One `Client` replays a record source (normally a forward file) over one
//! connection: each record becomes a MAIL FROM / RCPT TO / DATA cycle, and
//! the session ends with QUIT when the source runs out or the server turns
//! something down.

use std::io::{self, BufRead, Write};

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::codes::{rc, reply_code, ReplyCode};
use crate::support::error::Error;

lazy_static! {
    static ref RX_SENDER: Regex = Regex::new(r"^From:\s*<(.*)>$").unwrap();
    static ref RX_RECIPIENT: Regex = Regex::new(r"^To:\s*<(.*)>$").unwrap();
}

/// The address of a sender-tagged record line.
fn sender_address(line: &str) -> Option<&str> {
    RX_SENDER
        .captures(line)
        .map(|cap| cap.get(1).unwrap().as_str())
}

/// The address of a recipient-tagged record line.
fn recipient_address(line: &str) -> Option<&str> {
    RX_RECIPIENT
        .captures(line)
        .map(|cap| cap.get(1).unwrap().as_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Awaiting the next record's sender line.
    MailFrom,
    /// Awaiting the record's first recipient line.
    RcptTo,
    /// Awaiting further recipient lines or the line that triggers DATA.
    RcptToExtra,
    /// Forwarding raw record content.
    Data,
}

/// One validated reply line.
struct Reply {
    code: String,
    line: String,
}

impl Reply {
    fn is(&self, code: ReplyCode) -> bool {
        self.code.parse::<u16>().map_or(false, |c| c == code as u16)
    }
}

pub struct Client {
    read: Box<dyn BufRead + Send>,
    write: Box<dyn Write + Send>,
    records: Box<dyn BufRead + Send>,
    log_prefix: String,
    /// A record line already read but not yet processed: the sender line
    /// that ended the previous record, or the line that triggered DATA.
    carry: Option<String>,
}

impl Client {
    pub fn new<
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
        S: BufRead + Send + 'static,
    >(
        read: R,
        write: W,
        records: S,
        log_prefix: String,
    ) -> Self {
        Client {
            read: Box::new(read),
            write: Box::new(write),
            records: Box::new(records),
            log_prefix,
            carry: None,
        }
    }

    /// Perform the opening exchange: consume the server's greeting, then
    /// introduce ourselves as `helo_name`.
    ///
    /// Runs once before `run`. A server that refuses either step takes the
    /// error path (QUIT, then the error).
    pub fn greet(&mut self, helo_name: &str) -> Result<(), Error> {
        let greeting = self.read_reply()?;
        self.require("connect".to_owned(), greeting, rc::ServiceReady)?;

        let command = format!("HELO {}", helo_name);
        let reply = self.exchange(&command)?;
        self.require(command, reply, rc::Ok)
    }

    /// Replay the whole record source.
    ///
    /// Returns once QUIT has been answered, successfully if every record
    /// was accepted (or the server ended the session with an unexpected
    /// code during the recipient loop, which is treated as an orderly end).
    pub fn run(&mut self) -> Result<(), Error> {
        let mut state = State::MailFrom;

        loop {
            state = match state {
                State::MailFrom => {
                    let line = match self.next_record_line()? {
                        Some(line) => line,
                        None => return self.end_session(),
                    };

                    let sender = match sender_address(&line) {
                        Some(sender) => sender.to_owned(),
                        None => {
                            return self.abort_session(Error::BadRecord(
                                format!(
                                    "expected a sender line, got {:?}",
                                    line
                                ),
                            ))
                        }
                    };

                    let command = format!("MAIL FROM:<{}>", sender);
                    let reply = self.exchange(&command)?;
                    self.require(command, reply, rc::Ok)?;
                    State::RcptTo
                },

                State::RcptTo => {
                    let line = match self.next_record_line()? {
                        Some(line) => line,
                        None => {
                            return self.abort_session(Error::BadRecord(
                                "record ended before any recipient"
                                    .to_owned(),
                            ))
                        }
                    };

                    let recipient = match recipient_address(&line) {
                        Some(recipient) => recipient.to_owned(),
                        None => {
                            return self.abort_session(Error::BadRecord(
                                format!(
                                    "expected a recipient line, got {:?}",
                                    line
                                ),
                            ))
                        }
                    };

                    let command = format!("RCPT TO:<{}>", recipient);
                    let reply = self.exchange(&command)?;
                    self.require(command, reply, rc::Ok)?;
                    State::RcptToExtra
                },

                State::RcptToExtra => {
                    let command = match self.next_record_line()? {
                        Some(line) => match recipient_address(&line) {
                            Some(recipient) => {
                                format!("RCPT TO:<{}>", recipient)
                            },
                            None => {
                                // First non-recipient line: it triggers
                                // DATA and is replayed as record content.
                                self.carry = Some(line);
                                "DATA".to_owned()
                            },
                        },
                        // Source exhausted; the record has no content at
                        // all, which still takes the DATA round trip.
                        None => "DATA".to_owned(),
                    };

                    // Disambiguation is purely by reply code here.
                    let reply = self.exchange(&command)?;
                    if reply.is(rc::Ok) {
                        State::RcptToExtra
                    } else if reply.is(rc::StartMailInput) {
                        State::Data
                    } else {
                        return self.end_session();
                    }
                },

                State::Data => {
                    loop {
                        match self.next_record_line()? {
                            // Source exhausted: this record and the
                            // session are both over.
                            None => {
                                self.finish_record()?;
                                return self.end_session();
                            },
                            Some(line) => {
                                if "." == line {
                                    self.finish_record()?;
                                    break;
                                } else if sender_address(&line).is_some() {
                                    // A new record begins; keep its sender
                                    // line for the next cycle.
                                    self.carry = Some(line);
                                    self.finish_record()?;
                                    break;
                                } else {
                                    self.send_line(&line)?;
                                }
                            },
                        }
                    }

                    State::MailFrom
                },
            };
        }
    }

    /// Take the carried-over line if one exists, otherwise read the next
    /// line from the record source. `None` means the source is exhausted.
    fn next_record_line(&mut self) -> Result<Option<String>, Error> {
        if let Some(line) = self.carry.take() {
            return Ok(Some(line));
        }

        let mut raw = Vec::<u8>::new();
        let nread = self.records.read_until(b'\n', &mut raw)?;
        if 0 == nread {
            return Ok(None);
        }

        if raw.ends_with(b"\n") {
            raw.pop();
            if raw.ends_with(b"\r") {
                raw.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Send the data terminator and require the final acceptance reply.
    fn finish_record(&mut self) -> Result<(), Error> {
        let reply = self.exchange(".")?;
        self.require(".".to_owned(), reply, rc::Ok)
    }

    /// Require `reply` to carry the code `want`; anything else takes the
    /// error path.
    fn require(
        &mut self,
        command: String,
        reply: Reply,
        want: ReplyCode,
    ) -> Result<(), Error> {
        if reply.is(want) {
            Ok(())
        } else {
            self.abort_session(Error::Rejected {
                command,
                reply: reply.line,
            })
        }
    }

    /// The error path: QUIT, discard whatever comes back, surface `error`.
    fn abort_session(&mut self, error: Error) -> Result<(), Error> {
        self.quit_and_discard();
        Err(error)
    }

    /// The normal end: QUIT, await the closing reply, succeed regardless
    /// of its content.
    fn end_session(&mut self) -> Result<(), Error> {
        self.send_line("QUIT")?;
        self.read_reply_line()?;
        Ok(())
    }

    fn quit_and_discard(&mut self) {
        // Best effort; the session is already over.
        if self.send_line("QUIT").is_ok() {
            let _ = self.read_reply_line();
        }
    }

    /// Send `command` and read the acknowledging reply.
    ///
    /// A malformed reply ends the session (QUIT, answer discarded) and
    /// surfaces as `Error::InvalidReply`.
    fn exchange(&mut self, command: &str) -> Result<Reply, Error> {
        self.send_line(command)?;
        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<Reply, Error> {
        let raw = self.read_reply_line()?;
        let code = reply_code(&raw).map(str::to_owned);
        match code {
            Some(code) => Ok(Reply { code, line: raw }),
            None => {
                self.quit_and_discard();
                Err(Error::InvalidReply(raw))
            },
        }
    }

    fn read_reply_line(&mut self) -> Result<String, Error> {
        let mut raw = Vec::<u8>::new();
        let nread = self.read.read_until(b'\n', &mut raw)?;
        if 0 == nread {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached awaiting reply",
            )));
        }

        if raw.ends_with(b"\n") {
            raw.pop();
            if raw.ends_with(b"\r") {
                raw.pop();
            }
        }

        let line = String::from_utf8_lossy(&raw).into_owned();
        debug!("{} << {}", self.log_prefix, line);
        Ok(line)
    }

    fn send_line(&mut self, line: &str) -> Result<(), Error> {
        debug!("{} >> {}", self.log_prefix, line);
        write!(self.write, "{}\r\n", line)?;
        self.write.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::str;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn record_line_tagging() {
        assert_eq!(
            Some("foo@bar.com"),
            sender_address("From: <foo@bar.com>")
        );
        assert_eq!(Some("foo@bar.com"), sender_address("From:<foo@bar.com>"));
        assert_eq!(None, sender_address("To: <foo@bar.com>"));
        assert_eq!(None, sender_address(" From: <foo@bar.com>"));
        assert_eq!(None, sender_address("From: <foo@bar.com> "));

        assert_eq!(Some("c@d"), recipient_address("To: <c@d>"));
        assert_eq!(Some("c@d"), recipient_address("To:\t<c@d>"));
        assert_eq!(None, recipient_address("hello"));
        assert_eq!(None, recipient_address("."));
    }

    /// Captures everything the client sends so tests can assert on the
    /// exact command sequence.
    #[derive(Clone, Default)]
    struct CommandSink(Arc<Mutex<Vec<u8>>>);

    impl Write for CommandSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted_client(
        replies: &str,
        records: &str,
    ) -> (Client, CommandSink) {
        let sink = CommandSink::default();
        let client = Client::new(
            Cursor::new(replies.as_bytes().to_vec()),
            sink.clone(),
            Cursor::new(records.as_bytes().to_vec()),
            "test".to_owned(),
        );
        (client, sink)
    }

    fn sent(sink: &CommandSink) -> String {
        str::from_utf8(&sink.0.lock().unwrap())
            .unwrap()
            .to_owned()
    }

    #[test]
    fn replay_command_sequence() {
        let (mut client, sink) = scripted_client(
            "220 mx ready\r\n\
             250 Hello client\r\n\
             250 OK\r\n\
             250 OK\r\n\
             250 OK\r\n\
             354 Start mail input\r\n\
             250 OK\r\n\
             221 closing\r\n",
            "From: <x@y>\nTo: <a@b>\nTo: <c@d>\nhi\n.\n",
        );

        client.greet("client.example.com").unwrap();
        client.run().unwrap();

        assert_eq!(
            "HELO client.example.com\r\n\
             MAIL FROM:<x@y>\r\n\
             RCPT TO:<a@b>\r\n\
             RCPT TO:<c@d>\r\n\
             DATA\r\n\
             hi\r\n\
             .\r\n\
             QUIT\r\n",
            sent(&sink)
        );
    }

    #[test]
    fn back_to_back_records_share_the_session() {
        let (mut client, sink) = scripted_client(
            "250 OK\r\n\
             250 OK\r\n\
             354 go\r\n\
             250 OK\r\n\
             250 OK\r\n\
             250 OK\r\n\
             354 go\r\n\
             250 OK\r\n\
             221 closing\r\n",
            // The second record starts on a sender line with no dot
            // terminating the first.
            "From: <x@y>\nTo: <a@b>\nbody one\n\
             From: <p@q>\nTo: <c@d>\nbody two\n.\n",
        );

        client.run().unwrap();

        assert_eq!(
            "MAIL FROM:<x@y>\r\n\
             RCPT TO:<a@b>\r\n\
             DATA\r\n\
             body one\r\n\
             .\r\n\
             MAIL FROM:<p@q>\r\n\
             RCPT TO:<c@d>\r\n\
             DATA\r\n\
             body two\r\n\
             .\r\n\
             QUIT\r\n",
            sent(&sink)
        );
    }

    #[test]
    fn dot_terminator_is_sent_once() {
        // Zero-body record: the dot after the recipient both triggers DATA
        // and terminates the record.
        let (mut client, sink) = scripted_client(
            "250 OK\r\n250 OK\r\n354 go\r\n250 OK\r\n221 closing\r\n",
            "From: <x@y>\nTo: <a@b>\n.\n",
        );

        client.run().unwrap();

        assert_eq!(
            "MAIL FROM:<x@y>\r\n\
             RCPT TO:<a@b>\r\n\
             DATA\r\n\
             .\r\n\
             QUIT\r\n",
            sent(&sink)
        );
    }

    #[test]
    fn rejected_command_takes_error_path() {
        let (mut client, sink) = scripted_client(
            "503 Bad sequence of commands\r\n221 closing\r\n",
            "From: <x@y>\nTo: <a@b>\n.\n",
        );

        match client.run() {
            Err(Error::Rejected { command, reply }) => {
                assert_eq!("MAIL FROM:<x@y>", command);
                assert_eq!("503 Bad sequence of commands", reply);
            },
            r => panic!("unexpected result: {:?}", r.map_err(|e| e.to_string())),
        }

        assert_eq!("MAIL FROM:<x@y>\r\nQUIT\r\n", sent(&sink));
    }

    #[test]
    fn malformed_reply_takes_error_path() {
        let (mut client, sink) = scripted_client(
            "25 OK\r\n221 closing\r\n",
            "From: <x@y>\nTo: <a@b>\n.\n",
        );

        match client.run() {
            Err(Error::InvalidReply(line)) => assert_eq!("25 OK", line),
            r => panic!("unexpected result: {:?}", r.map_err(|e| e.to_string())),
        }

        assert_eq!("MAIL FROM:<x@y>\r\nQUIT\r\n", sent(&sink));
    }

    #[test]
    fn unexpected_code_in_recipient_loop_ends_quietly() {
        // A server bowing out mid-loop is an orderly end, not an error.
        let (mut client, sink) = scripted_client(
            "250 OK\r\n250 OK\r\n550 no more\r\n221 closing\r\n",
            "From: <x@y>\nTo: <a@b>\nTo: <c@d>\nhi\n.\n",
        );

        client.run().unwrap();

        assert_eq!(
            "MAIL FROM:<x@y>\r\n\
             RCPT TO:<a@b>\r\n\
             RCPT TO:<c@d>\r\n\
             QUIT\r\n",
            sent(&sink)
        );
    }

    #[test]
    fn untagged_first_line_is_a_bad_record() {
        let (mut client, _sink) = scripted_client(
            "221 closing\r\n",
            "hello there\n",
        );

        assert_matches!(Err(Error::BadRecord(_)), client.run());
    }

    #[test]
    fn empty_source_just_quits() {
        let (mut client, sink) =
            scripted_client("221 closing\r\n", "");

        client.run().unwrap();
        assert_eq!("QUIT\r\n", sent(&sink));
    }
}
