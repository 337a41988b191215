//! GDB/MI output records
//!
//! One line of gdb's machine interface output parses into one [`Record`]:
//!
//! ```text
//! 12^done,value="0x8048400"
//! *stopped,reason="end-stepping-range",frame={addr="0x8048402",func="main"}
//! ~"Starting program: /tmp/a.out\n"
//! (gdb)
//! ```

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("MI parse error at byte {position}: {message}")]
pub struct MiParseError {
    pub position: usize,
    pub message: String,
}

/// A result or async record value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Const(String),
    Tuple(Results),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Results> {
        match self {
            Value::Tuple(results) => Some(results),
            _ => None,
        }
    }

    /// Field lookup on a tuple value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_tuple().and_then(|t| t.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// `name=value` pairs, in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results(pub Vec<(String, Value)>);

impl Results {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`
    Exec,
    /// `+`
    Status,
    /// `=`
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~`
    Console,
    /// `@`
    Target,
    /// `&`
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Result {
        token: Option<u32>,
        class: ResultClass,
        results: Results,
    },
    Async {
        token: Option<u32>,
        kind: AsyncKind,
        class: String,
        results: Results,
    },
    Stream {
        kind: StreamKind,
        text: String,
    },
    Prompt,
}

/// Parse a single line of MI output
pub fn parse_record(line: &str) -> Result<Record, MiParseError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim_end() == "(gdb)" {
        return Ok(Record::Prompt);
    }

    let mut p = Parser {
        input: line.as_bytes(),
        pos: 0,
    };
    let record = p.record()?;
    if p.pos != p.input.len() {
        return Err(p.error("trailing characters"));
    }
    Ok(record)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> MiParseError {
        MiParseError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, c: u8) -> Result<(), MiParseError> {
        match self.bump() {
            Some(got) if got == c => Ok(()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(&format!("expected `{}`", c as char)))
            }
        }
    }

    fn token(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn record(&mut self) -> Result<Record, MiParseError> {
        let token = self.token();
        let marker = self.bump().ok_or_else(|| self.error("empty record"))?;

        match marker {
            b'^' => {
                let class = match self.word().as_str() {
                    "done" => ResultClass::Done,
                    "running" => ResultClass::Running,
                    "connected" => ResultClass::Connected,
                    "error" => ResultClass::Error,
                    "exit" => ResultClass::Exit,
                    _ => return Err(self.error("unknown result class")),
                };
                let results = self.trailing_results()?;
                Ok(Record::Result {
                    token,
                    class,
                    results,
                })
            }
            b'*' | b'+' | b'=' => {
                let kind = match marker {
                    b'*' => AsyncKind::Exec,
                    b'+' => AsyncKind::Status,
                    _ => AsyncKind::Notify,
                };
                let class = self.word();
                if class.is_empty() {
                    return Err(self.error("missing async class"));
                }
                let results = self.trailing_results()?;
                Ok(Record::Async {
                    token,
                    kind,
                    class,
                    results,
                })
            }
            b'~' | b'@' | b'&' if token.is_none() => {
                let kind = match marker {
                    b'~' => StreamKind::Console,
                    b'@' => StreamKind::Target,
                    _ => StreamKind::Log,
                };
                let text = self.c_string()?;
                Ok(Record::Stream { kind, text })
            }
            _ => {
                self.pos -= 1;
                Err(self.error("unknown record type"))
            }
        }
    }

    /// Identifier made of everything up to `,`, `=` or end of line
    fn word(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b',' || c == b'=' {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn trailing_results(&mut self) -> Result<Results, MiParseError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        Ok(Results(results))
    }

    fn result(&mut self) -> Result<(String, Value), MiParseError> {
        let name = self.word();
        if name.is_empty() {
            return Err(self.error("missing variable name"));
        }
        self.expect(b'=')?;
        let value = self.value()?;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<Value, MiParseError> {
        match self.peek() {
            Some(b'"') => Ok(Value::Const(self.c_string()?)),
            Some(b'{') => {
                self.pos += 1;
                let mut results = Vec::new();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(Value::Tuple(Results(results)));
                }
                loop {
                    results.push(self.result()?);
                    match self.bump() {
                        Some(b',') => continue,
                        Some(b'}') => break,
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.error("unterminated tuple"));
                        }
                    }
                }
                Ok(Value::Tuple(Results(results)))
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                loop {
                    items.push(self.list_item()?);
                    match self.bump() {
                        Some(b',') => continue,
                        Some(b']') => break,
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.error("unterminated list"));
                        }
                    }
                }
                Ok(Value::List(items))
            }
            _ => Err(self.error("expected value")),
        }
    }

    /// A list holds either plain values or `name=value` results; a result
    /// item is kept as a single-entry tuple.
    fn list_item(&mut self) -> Result<Value, MiParseError> {
        match self.peek() {
            Some(b'"') | Some(b'{') | Some(b'[') => self.value(),
            _ => {
                let (name, value) = self.result()?;
                Ok(Value::Tuple(Results(vec![(name, value)])))
            }
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match c {
                b'"' => break,
                b'\\' => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            let mut value = (esc - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.pos += 1;
                                        value = value * 8 + (d - b'0') as u32;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(value as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt() {
        assert_eq!(parse_record("(gdb) "), Ok(Record::Prompt));
        assert_eq!(parse_record("(gdb)\n"), Ok(Record::Prompt));
    }

    #[test]
    fn test_done_with_value() {
        let rec = parse_record("7^done,value=\"0x8048400\"").unwrap();
        match rec {
            Record::Result { token, class, results } => {
                assert_eq!(token, Some(7));
                assert_eq!(class, ResultClass::Done);
                assert_eq!(results.get_str("value"), Some("0x8048400"));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_error_record() {
        let rec = parse_record("3^error,msg=\"No registers.\"").unwrap();
        match rec {
            Record::Result { class, results, .. } => {
                assert_eq!(class, ResultClass::Error);
                assert_eq!(results.get_str("msg"), Some("No registers."));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_stopped_with_frame() {
        let line = "*stopped,reason=\"end-stepping-range\",frame={addr=\"0x08048402\",func=\"main\",args=[]},thread-id=\"1\"";
        let rec = parse_record(line).unwrap();
        match rec {
            Record::Async { token, kind, class, results } => {
                assert_eq!(token, None);
                assert_eq!(kind, AsyncKind::Exec);
                assert_eq!(class, "stopped");
                assert_eq!(results.get_str("reason"), Some("end-stepping-range"));
                let frame = results.get("frame").unwrap();
                assert_eq!(frame.get_str("addr"), Some("0x08048402"));
                assert_eq!(frame.get("args").and_then(Value::as_list).map(|l| l.len()), Some(0));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_result_list() {
        let line = "5^done,register-values=[{number=\"0\",value=\"0x1\"},{number=\"8\",value=\"0x8048000\"}]";
        let rec = parse_record(line).unwrap();
        let Record::Result { results, .. } = rec else {
            panic!("expected result record");
        };
        let values = results.get("register-values").and_then(Value::as_list).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].get_str("number"), Some("8"));
        assert_eq!(values[1].get_str("value"), Some("0x8048000"));
    }

    #[test]
    fn test_named_list_items() {
        let rec = parse_record("^done,stack=[frame={level=\"0\"},frame={level=\"1\"}]").unwrap();
        let Record::Result { results, .. } = rec else {
            panic!("expected result record");
        };
        let frames = results.get("stack").and_then(Value::as_list).unwrap();
        assert_eq!(frames[1].get("frame").and_then(|f| f.get_str("level")), Some("1"));
    }

    #[test]
    fn test_stream_escapes() {
        let rec = parse_record(r#"~"=> 0x8048400 <main>:\tpush   ebp\n""#).unwrap();
        assert_eq!(
            rec,
            Record::Stream {
                kind: StreamKind::Console,
                text: "=> 0x8048400 <main>:\tpush   ebp\n".into(),
            }
        );

        let rec = parse_record(r#"&"say \"hi\" \101\n""#).unwrap();
        assert_eq!(
            rec,
            Record::Stream {
                kind: StreamKind::Log,
                text: "say \"hi\" A\n".into(),
            }
        );
    }

    #[test]
    fn test_notify_without_results() {
        let rec = parse_record("=thread-group-added,id=\"i1\"").unwrap();
        assert!(matches!(rec, Record::Async { kind: AsyncKind::Notify, .. }));
        let rec = parse_record("^running").unwrap();
        assert!(matches!(rec, Record::Result { class: ResultClass::Running, .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_record("").is_err());
        assert!(parse_record("^bogus").is_err());
        assert!(parse_record("^done,value=\"open").is_err());
        let err = parse_record("^done,frame={addr=\"1\"").unwrap_err();
        assert!(err.message.contains("tuple"));
    }
}
