//! Message framing on stdio. A request is either one JSON document per line
//! or a `Content-Length` framed body; the reply uses the same framing.

use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Line,
    ContentLength,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Message { body: Vec<u8>, framing: Framing },
    Malformed { reason: String, framing: Framing },
}

/// Reads the next message; `None` once the input is exhausted.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Incoming>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let first = line.trim();
        if first.is_empty() {
            continue;
        }
        if !is_header(first) {
            return Ok(Some(Incoming::Message {
                body: first.as_bytes().to_vec(),
                framing: Framing::Line,
            }));
        }
        let length = content_length(first);
        return read_framed_body(reader, length).map(Some);
    }
}

fn read_framed_body<R: BufRead>(
    reader: &mut R,
    mut length: Option<usize>,
) -> io::Result<Incoming> {
    let malformed = |reason: String| Incoming::Malformed {
        reason,
        framing: Framing::ContentLength,
    };

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(malformed("eof inside frame headers".to_string()));
        }
        let header = line.trim();
        if header.is_empty() {
            break;
        }
        length = content_length(header).or(length);
    }

    let Some(length) = length else {
        return Ok(malformed("missing content-length header".to_string()));
    };
    let mut body = vec![0_u8; length];
    if let Err(err) = reader.read_exact(&mut body) {
        return Ok(malformed(format!("truncated frame body: {err}")));
    }
    Ok(Incoming::Message {
        body,
        framing: Framing::ContentLength,
    })
}

pub fn write_message<W: Write>(out: &mut W, body: &[u8], framing: Framing) -> io::Result<()> {
    match framing {
        Framing::Line => {
            out.write_all(body)?;
            out.write_all(b"\n")?;
        }
        Framing::ContentLength => {
            write!(out, "Content-Length: {}\r\n\r\n", body.len())?;
            out.write_all(body)?;
        }
    }
    out.flush()
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then_some(value.trim())
}

fn is_header(line: &str) -> bool {
    ["content-length", "content-type"]
        .iter()
        .any(|name| header_value(line, name).is_some())
}

fn content_length(line: &str) -> Option<usize> {
    header_value(line, "content-length")?.parse().ok()
}
