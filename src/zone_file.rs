// Copyright 2026 the bulwark developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! A reader for a useful subset of RFC 1035 master files.
//!
//! The [`Parser`] implements [`RecordSource`], so it can feed a
//! [`SourceLoader`](crate::zone::SourceLoader) directly. The supported
//! subset covers the files the daemon is expected to serve: `$ORIGIN`
//! and `$TTL` directives, `@` and relative owner names, owner
//! inheritance from the previous record, comments, quoted strings, and
//! the A, AAAA, NS, CNAME, SOA, PTR, MX, and TXT types. Multi-line
//! parenthesized records, `$INCLUDE`, escape sequences, and
//! time-unit TTLs (`1h30m`) are not supported.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Ttl, Type};
use crate::zone::{Record, RecordSource, SourceError};

/// A master-file reader producing one [`Record`] at a time.
pub struct Parser<R> {
    reader: R,
    line_number: usize,
    origin: Name,
    default_ttl: Option<Ttl>,
    last_owner: Option<Name>,
}

impl Parser<BufReader<File>> {
    /// Opens the master file at `path`. Names in the file are resolved
    /// against `origin` until a `$ORIGIN` directive changes it.
    pub fn open(path: impl AsRef<Path>, origin: Name) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?), origin))
    }
}

impl<R: BufRead> Parser<R> {
    /// Creates a parser reading master-file text from `reader`.
    pub fn new(reader: R, origin: Name) -> Self {
        Self {
            reader,
            line_number: 0,
            origin,
            default_ttl: None,
            last_owner: None,
        }
    }

    /// Produces the next record in the file, or `None` at the end.
    pub fn next_entry(&mut self) -> Result<Option<Record>, Error> {
        loop {
            let mut line = String::new();
            self.line_number += 1;
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }

            let starts_indented = line.starts_with([' ', '\t']);
            let tokens = tokenize(&line).map_err(|message| self.syntax_error(message))?;
            if tokens.is_empty() {
                continue;
            }

            if let Some(directive) = tokens[0].strip_prefix('$') {
                self.process_directive(directive, &tokens[1..])?;
                continue;
            }

            return self.process_record(&tokens, starts_indented).map(Some);
        }
    }

    fn process_directive(&mut self, directive: &str, args: &[String]) -> Result<(), Error> {
        match (directive.to_ascii_uppercase().as_str(), args) {
            ("ORIGIN", [name]) => {
                self.origin = self.resolve_name(name)?;
                Ok(())
            }
            ("TTL", [ttl]) => {
                let ttl: u32 = ttl
                    .parse()
                    .map_err(|_| self.syntax_error("invalid $TTL value"))?;
                self.default_ttl = Some(Ttl::from(ttl));
                Ok(())
            }
            ("ORIGIN" | "TTL", _) => {
                Err(self.syntax_error("directive takes exactly one argument"))
            }
            _ => Err(self.syntax_error(format!("unsupported directive ${}", directive))),
        }
    }

    fn process_record(&mut self, tokens: &[String], starts_indented: bool) -> Result<Record, Error> {
        let mut rest = tokens;
        let owner = if starts_indented {
            self.last_owner
                .clone()
                .ok_or_else(|| self.syntax_error("no previous owner to inherit"))?
        } else {
            let owner = self.resolve_name(&rest[0])?;
            rest = &rest[1..];
            owner
        };
        self.last_owner = Some(owner.clone());

        // The TTL and class may appear in either order before the type.
        let mut ttl = None;
        let mut class = None;
        let rr_type = loop {
            let token = rest
                .first()
                .ok_or_else(|| self.syntax_error("record has no type"))?;
            rest = &rest[1..];
            if ttl.is_none() {
                if let Ok(value) = token.parse::<u32>() {
                    ttl = Some(Ttl::from(value));
                    continue;
                }
            }
            if class.is_none() {
                if let Ok(value) = token.parse::<Class>() {
                    class = Some(value);
                    continue;
                }
            }
            match token.parse::<Type>() {
                Ok(rr_type) => break rr_type,
                Err(_) => {
                    return Err(self.syntax_error(format!("unrecognized RR type {}", token)))
                }
            }
        };

        let ttl = ttl
            .or(self.default_ttl)
            .ok_or_else(|| self.syntax_error("record has no TTL and no $TTL is in effect"))?;
        let rdata = self.assemble_rdata(rr_type, rest)?;
        Ok(Record {
            owner,
            rr_type,
            class: class.unwrap_or(Class::IN),
            ttl,
            rdata,
        })
    }

    /// Builds the wire-form RDATA for the supported types.
    fn assemble_rdata(&self, rr_type: Type, args: &[String]) -> Result<Vec<u8>, Error> {
        match rr_type {
            Type::A => {
                let [address] = args else {
                    return Err(self.syntax_error("A records take one address"));
                };
                let address: Ipv4Addr = address
                    .parse()
                    .map_err(|_| self.syntax_error("invalid IPv4 address"))?;
                Ok(address.octets().to_vec())
            }
            Type::AAAA => {
                let [address] = args else {
                    return Err(self.syntax_error("AAAA records take one address"));
                };
                let address: Ipv6Addr = address
                    .parse()
                    .map_err(|_| self.syntax_error("invalid IPv6 address"))?;
                Ok(address.octets().to_vec())
            }
            Type::NS | Type::CNAME | Type::PTR => {
                let [name] = args else {
                    return Err(self.syntax_error("record takes one domain name"));
                };
                Ok(self.resolve_name(name)?.wire_repr().to_vec())
            }
            Type::MX => {
                let [preference, exchange] = args else {
                    return Err(self.syntax_error("MX records take a preference and a name"));
                };
                let preference: u16 = preference
                    .parse()
                    .map_err(|_| self.syntax_error("invalid MX preference"))?;
                let mut rdata = preference.to_be_bytes().to_vec();
                rdata.extend_from_slice(self.resolve_name(exchange)?.wire_repr());
                Ok(rdata)
            }
            Type::TXT => {
                if args.is_empty() {
                    return Err(self.syntax_error("TXT records take at least one string"));
                }
                let mut rdata = Vec::new();
                for string in args {
                    if string.len() > 255 {
                        return Err(self.syntax_error("TXT string exceeds 255 octets"));
                    }
                    rdata.push(string.len() as u8);
                    rdata.extend_from_slice(string.as_bytes());
                }
                Ok(rdata)
            }
            Type::SOA => {
                let [mname, rname, rest @ ..] = args else {
                    return Err(self.syntax_error("SOA records take seven fields"));
                };
                if rest.len() != 5 {
                    return Err(self.syntax_error("SOA records take seven fields"));
                }
                let mut rdata = self.resolve_name(mname)?.wire_repr().to_vec();
                rdata.extend_from_slice(self.resolve_name(rname)?.wire_repr());
                for field in rest {
                    let value: u32 = field
                        .parse()
                        .map_err(|_| self.syntax_error("invalid SOA numeric field"))?;
                    rdata.extend_from_slice(&value.to_be_bytes());
                }
                Ok(rdata)
            }
            other => Err(self.syntax_error(format!("unsupported RR type {}", other))),
        }
    }

    /// Resolves an owner or RDATA name token: `@` is the origin,
    /// absolute names stand alone, and relative names are completed
    /// against the origin.
    fn resolve_name(&self, token: &str) -> Result<Name, Error> {
        if token == "@" {
            return Ok(self.origin.clone());
        }
        if token.ends_with('.') {
            return token
                .parse()
                .map_err(|e| self.syntax_error(format!("invalid domain name: {}", e)));
        }
        let relative: Name = format!("{}.", token)
            .parse()
            .map_err(|e| self.syntax_error(format!("invalid domain name: {}", e)))?;
        relative
            .concatenated_with(&self.origin)
            .map_err(|e| self.syntax_error(format!("invalid domain name: {}", e)))
    }

    fn syntax_error(&self, message: impl Into<String>) -> Error {
        Error::Syntax {
            line: self.line_number,
            message: message.into(),
        }
    }
}

impl<R: BufRead> RecordSource for Parser<R> {
    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        self.next_entry().map_err(|e| SourceError::new(e.to_string()))
    }
}

/// Splits a line into tokens, honoring quoted strings and stripping
/// comments. Quotes may not span lines and escapes are not interpreted.
fn tokenize(line: &str) -> Result<Vec<String>, &'static str> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                // An empty quoted string still produces a token.
                in_token = true;
            }
            ';' if !in_quotes => break,
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quoted string");
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors produced while reading a master file.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Syntax { line: usize, message: String },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error reading zone file: {}", err),
            Self::Syntax { line, message } => write!(f, "line {}: {}", line, message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
