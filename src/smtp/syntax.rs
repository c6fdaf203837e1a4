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

//! Recursive-descent parsing for the restricted command grammar.
//!
//! ```text
//! mail-from-cmd := "MAIL" WS "FROM:" NULLSPACE path NULLSPACE CRLF
//! rcpt-to-cmd   := "RCPT" WS "TO:"   NULLSPACE path NULLSPACE CRLF
//! data-cmd      := "DATA" NULLSPACE CRLF
//! hello-cmd     := "HELO" WS domain NULLSPACE CRLF
//! quit-cmd      := "QUIT" NULLSPACE CRLF
//! path          := "<" mailbox ">"
//! mailbox       := local-part "@" domain
//! domain        := element ("." element)*
//! element       := letter (alnum)*
//! WS            := (space|tab)+ ; NULLSPACE := WS | empty
//! ```
//!
//! Parsing is greedy and non-backtracking. Every rule either consumes what
//! it matched or fails the whole parse, and the first rule to fail is the
//! one reported.

use std::fmt;

/// A mailbox extracted from a path, `local-part@domain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    pub local: String,
    pub domain: String,
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// One fully parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// HELO origin-host
    Hello(String),
    /// MAIL FROM:<return-path>
    MailFrom(Mailbox),
    /// RCPT TO:<forward-path>
    RcptTo(Mailbox),
    /// DATA
    Data,
    /// QUIT
    Quit,
}

/// The command family a line was assigned to.
///
/// The family is chosen solely by the first byte of the line; anything not
/// starting with one of the five command initials is `Unrecognized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Hello,
    MailFrom,
    RcptTo,
    Data,
    Quit,
    Unrecognized,
}

/// Whether a failed parse died in a command-name rule or somewhere below.
///
/// The server maps `BadCommand` to 500 and `BadParameter` to 501.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    BadCommand,
    BadParameter,
}

/// Where a parse failed.
///
/// `rule` and `remainder` are diagnostics only; the reply the peer sees is
/// driven entirely by `kind`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxError {
    pub verb: Verb,
    pub kind: SyntaxErrorKind,
    /// The name of the grammar rule that failed first.
    pub rule: &'static str,
    /// The unconsumed input at the point of that failure.
    pub remainder: String,
}

/// Classify one command line.
///
/// `line` must already have its terminator removed; the grammar's CRLF
/// terminal corresponds to the end of the string. Every call is independent
/// and returns a fresh value.
pub fn parse_command(line: &str) -> Result<Command, SyntaxError> {
    let (verb, result) = match line.bytes().next() {
        Some(b'M') => (Verb::MailFrom, mail_from_cmd(line)),
        Some(b'R') => (Verb::RcptTo, rcpt_to_cmd(line)),
        Some(b'D') => (Verb::Data, data_cmd(line)),
        Some(b'H') => (Verb::Hello, hello_cmd(line)),
        Some(b'Q') => (Verb::Quit, quit_cmd(line)),
        _ => {
            return Err(SyntaxError {
                verb: Verb::Unrecognized,
                kind: SyntaxErrorKind::BadCommand,
                rule: "command",
                remainder: line.to_owned(),
            })
        }
    };

    result.map_err(|fail| SyntaxError {
        verb,
        kind: kind_for_rule(fail.rule),
        rule: fail.rule,
        remainder: fail.remainder.to_owned(),
    })
}

fn kind_for_rule(rule: &str) -> SyntaxErrorKind {
    if rule.ends_with("-cmd") || "command" == rule {
        SyntaxErrorKind::BadCommand
    } else {
        SyntaxErrorKind::BadParameter
    }
}

fn mail_from_cmd(line: &str) -> Result<Command, Fail<'_>> {
    let mut p = Parser::new(line);
    p.exact("MAIL", "mail-from-cmd")?;
    p.whitespace()?;
    p.exact("FROM:", "mail-from-cmd")?;
    p.nullspace();
    let mailbox = p.path()?;
    p.nullspace();
    p.end("mail-from-cmd")?;
    Ok(Command::MailFrom(mailbox))
}

fn rcpt_to_cmd(line: &str) -> Result<Command, Fail<'_>> {
    let mut p = Parser::new(line);
    p.exact("RCPT", "rcpt-to-cmd")?;
    p.whitespace()?;
    p.exact("TO:", "rcpt-to-cmd")?;
    p.nullspace();
    let mailbox = p.path()?;
    p.nullspace();
    p.end("rcpt-to-cmd")?;
    Ok(Command::RcptTo(mailbox))
}

fn data_cmd(line: &str) -> Result<Command, Fail<'_>> {
    let mut p = Parser::new(line);
    p.exact("DATA", "data-cmd")?;
    p.nullspace();
    p.end("data-cmd")?;
    Ok(Command::Data)
}

fn hello_cmd(line: &str) -> Result<Command, Fail<'_>> {
    let mut p = Parser::new(line);
    p.exact("HELO", "hello-cmd")?;
    p.whitespace()?;
    let domain = p.domain()?;
    p.nullspace();
    p.end("hello-cmd")?;
    Ok(Command::Hello(domain.to_owned()))
}

fn quit_cmd(line: &str) -> Result<Command, Fail<'_>> {
    let mut p = Parser::new(line);
    p.exact("QUIT", "quit-cmd")?;
    p.nullspace();
    p.end("quit-cmd")?;
    Ok(Command::Quit)
}

/// An in-flight parse failure, before the verb context is attached.
struct Fail<'a> {
    rule: &'static str,
    remainder: &'a str,
}

/// Cursor over a single line. One is created per `parse_command` call and
/// never outlives it.
struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(line: &'a str) -> Self {
        Parser { rest: line }
    }

    fn fail<T>(&self, rule: &'static str) -> Result<T, Fail<'a>> {
        Err(Fail {
            rule,
            remainder: self.rest,
        })
    }

    fn exact(
        &mut self,
        token: &str,
        rule: &'static str,
    ) -> Result<(), Fail<'a>> {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => self.fail(rule),
        }
    }

    fn take_char(&mut self, c: char) -> bool {
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    // whitespace := (space|tab)+
    fn whitespace(&mut self) -> Result<(), Fail<'a>> {
        if !matches!(self.rest.bytes().next(), Some(b' ') | Some(b'\t')) {
            return self.fail("whitespace");
        }

        self.nullspace();
        Ok(())
    }

    // nullspace := whitespace | empty; cannot fail
    fn nullspace(&mut self) {
        self.rest = self.rest.trim_start_matches(|c| ' ' == c || '\t' == c);
    }

    fn end(&mut self, rule: &'static str) -> Result<(), Fail<'a>> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            self.fail(rule)
        }
    }

    // path := "<" mailbox ">"
    fn path(&mut self) -> Result<Mailbox, Fail<'a>> {
        if !self.take_char('<') {
            return self.fail("path");
        }
        let mailbox = self.mailbox()?;
        if !self.take_char('>') {
            return self.fail("path");
        }
        Ok(mailbox)
    }

    // mailbox := local-part "@" domain
    fn mailbox(&mut self) -> Result<Mailbox, Fail<'a>> {
        let local = self.local_part()?;
        if !self.take_char('@') {
            return self.fail("mailbox");
        }
        let domain = self.domain()?;
        Ok(Mailbox {
            local: local.to_owned(),
            domain: domain.to_owned(),
        })
    }

    // local-part := one or more of anything outside the forbidden set
    fn local_part(&mut self) -> Result<&'a str, Fail<'a>> {
        let end = self
            .rest
            .find(is_forbidden_local_char)
            .unwrap_or(self.rest.len());
        if 0 == end {
            return self.fail("local-part");
        }

        let (local, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(local)
    }

    // domain := element ("." element)*
    fn domain(&mut self) -> Result<&'a str, Fail<'a>> {
        let start = self.rest;
        self.element()?;
        while self.take_char('.') {
            self.element()?;
        }

        Ok(&start[..start.len() - self.rest.len()])
    }

    // element := letter (alnum)*
    fn element(&mut self) -> Result<(), Fail<'a>> {
        match self.rest.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => (),
            _ => return self.fail("element"),
        }

        self.rest = self
            .rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        Ok(())
    }
}

fn is_forbidden_local_char(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t'
            | '<'
            | '>'
            | '('
            | ')'
            | '['
            | ']'
            | '\\'
            | '.'
            | ','
            | ';'
            | ':'
            | '@'
            | '"'
    )
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::SyntaxErrorKind::*;
    use super::*;

    fn mailbox(local: &str, domain: &str) -> Mailbox {
        Mailbox {
            local: local.to_owned(),
            domain: domain.to_owned(),
        }
    }

    fn err(
        verb: Verb,
        kind: SyntaxErrorKind,
        rule: &'static str,
        remainder: &str,
    ) -> Result<Command, SyntaxError> {
        Err(SyntaxError {
            verb,
            kind,
            rule,
            remainder: remainder.to_owned(),
        })
    }

    #[test]
    fn command_parsing() {
        assert_eq!(
            Ok(Command::MailFrom(mailbox("foo", "bar.com"))),
            parse_command("MAIL FROM:<foo@bar.com>")
        );
        assert_eq!(
            Ok(Command::MailFrom(mailbox("foo", "bar.com"))),
            parse_command("MAIL \t FROM: \t <foo@bar.com> \t ")
        );
        assert_eq!(
            Ok(Command::RcptTo(mailbox("userc", "d.bar.org"))),
            parse_command("RCPT TO:<userc@d.bar.org>")
        );
        assert_eq!(
            Ok(Command::Hello("foo.example.com".to_owned())),
            parse_command("HELO foo.example.com")
        );
        assert_eq!(
            Ok(Command::Hello("a".to_owned())),
            parse_command("HELO a")
        );
        assert_eq!(Ok(Command::Data), parse_command("DATA"));
        assert_eq!(Ok(Command::Data), parse_command("DATA "));
        assert_eq!(Ok(Command::Quit), parse_command("QUIT"));

        // Local parts take any character outside the forbidden set.
        assert_eq!(
            Ok(Command::MailFrom(mailbox("f!#$%^&*o", "b2.c"))),
            parse_command("MAIL FROM:<f!#$%^&*o@b2.c>")
        );

        // Family selection is by first byte only; the rest of the command
        // word belongs to the command-name rule.
        assert_eq!(
            err(Verb::MailFrom, BadCommand, "mail-from-cmd", "MAULED"),
            parse_command("MAULED")
        );
        assert_eq!(
            err(Verb::Quit, BadCommand, "quit-cmd", "X"),
            parse_command("QUITX")
        );
        assert_eq!(
            err(Verb::Data, BadCommand, "data-cmd", "BASE"),
            parse_command("DATABASE")
        );
        assert_eq!(
            err(Verb::Hello, BadCommand, "hello-cmd", "Hello"),
            parse_command("Hello")
        );
        assert_eq!(
            err(Verb::Unrecognized, BadCommand, "command", "EHLO there"),
            parse_command("EHLO there")
        );
        assert_eq!(
            err(Verb::Unrecognized, BadCommand, "command", ""),
            parse_command("")
        );

        // Missing mandatory whitespace is a parameter problem, not a
        // command-name problem.
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "whitespace", "FROM:<a@b>"),
            parse_command("MAILFROM:<a@b>")
        );
        assert_eq!(
            err(Verb::Hello, BadParameter, "whitespace", ""),
            parse_command("HELO")
        );

        assert_eq!(
            err(Verb::MailFrom, BadParameter, "path", "a@b"),
            parse_command("MAIL FROM:a@b")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "path", " extra"),
            parse_command("MAIL FROM:<a@b extra")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "local-part", "@b>"),
            parse_command("MAIL FROM:<@b>")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "mailbox", ">"),
            parse_command("MAIL FROM:<a>")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "element", ">"),
            parse_command("MAIL FROM:<a@>")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "element", "1b>"),
            parse_command("MAIL FROM:<a@1b>")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "element", ".b>"),
            parse_command("MAIL FROM:<a@b..b>")
        );
        assert_eq!(
            err(Verb::MailFrom, BadParameter, "element", ">"),
            parse_command("MAIL FROM:<a@b.>")
        );
        // The domain rule stops before the dash, so the path rule is the
        // one that sees it.
        assert_eq!(
            err(Verb::RcptTo, BadParameter, "path", "-d>"),
            parse_command("RCPT TO:<c@d-d>")
        );

        // Trailing garbage after a complete command fails the command rule.
        assert_eq!(
            err(Verb::MailFrom, BadCommand, "mail-from-cmd", "x"),
            parse_command("MAIL FROM:<a@b>x")
        );
        assert_eq!(
            err(Verb::RcptTo, BadCommand, "rcpt-to-cmd", ",<e@f>"),
            parse_command("RCPT TO:<c@d>,<e@f>")
        );
        assert_eq!(
            err(Verb::Hello, BadCommand, "hello-cmd", "!"),
            parse_command("HELO a.b!")
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 4096,
            ..ProptestConfig::default()
        })]

        #[test]
        fn accepted_mailboxes_are_well_formed(
            line in "MAIL[ \t]{1,2}FROM:<[!-~]{0,10}@[!-~]{0,6}>",
        ) {
            if let Ok(Command::MailFrom(mailbox)) = parse_command(&line) {
                prop_assert!(!mailbox.local.is_empty());
                prop_assert!(
                    !mailbox.local.chars().any(is_forbidden_local_char));
                for element in mailbox.domain.split('.') {
                    prop_assert!(element
                        .chars()
                        .next()
                        .map_or(false, |c| c.is_ascii_alphabetic()));
                    prop_assert!(element
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric()));
                }
            }
        }

        #[test]
        fn parsing_is_stateless(line in "[ -~]{0,32}") {
            prop_assert_eq!(parse_command(&line), parse_command(&line));
        }
    }
}
