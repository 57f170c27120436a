//! Probe calls recovered from instrumented text.
//!
//! The execution host is handed scripts that were instrumented elsewhere,
//! so it finds the calls in the text itself. That is enough to map compiler
//! locations back to the script as written and to take out captures the
//! borrow checker rejects.

use std::collections::BTreeMap;
use std::ops::Range;

use super::compiler::PROBE_MACRO;
use super::syntax::Span;

/// One probe call found in instrumented text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    /// Bytes the insertion occupies, indentation and terminator included.
    pub range: Range<usize>,
    /// Bytes between the parentheses.
    pub args: Range<usize>,
    /// Span the call reports.
    pub span: Span,
    /// Captured names and where each one is written.
    pub captures: Vec<(String, Range<usize>)>,
}

impl ProbeCall {
    pub fn captures(&self, name: &str) -> bool {
        self.captures.iter().any(|(n, _)| n == name)
    }

    /// The only capture written inside `range`, if there is exactly one.
    pub fn capture_within(&self, range: Range<usize>) -> Option<&str> {
        let mut hits = self
            .captures
            .iter()
            .filter(|(_, at)| at.start < range.end.max(range.start + 1) && range.start < at.end);
        match (hits.next(), hits.next()) {
            (Some((name, _)), None) => Some(name),
            _ => None,
        }
    }

    fn render_args(&self, dropped: &[&str]) -> String {
        let kept: Vec<&str> = self
            .captures
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| !dropped.contains(n))
            .collect();
        if kept.is_empty() {
            format!("{}, {}", self.span.start, self.span.len)
        } else {
            format!("{}, {}; {}", self.span.start, self.span.len, kept.join(", "))
        }
    }
}

/// Something to take out of an instrumented script.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Removal {
    /// One captured variable of a call.
    Capture { call: usize, name: String },
    /// A whole call.
    Call(usize),
}

/// Every probe call of an instrumented script, in text order.
#[derive(Debug, Clone, Default)]
pub struct ProbeMap {
    calls: Vec<ProbeCall>,
}

impl ProbeMap {
    pub fn scan(text: &str) -> Self {
        let mut calls = Vec::new();
        let mut from = 0;
        while let Some(found) = text[from..].find(PROBE_MACRO) {
            let start = from + found;
            match parse_call(text, start) {
                Some(call) => {
                    from = call.range.end;
                    calls.push(call);
                }
                None => from = start + PROBE_MACRO.len(),
            }
        }
        Self { calls }
    }

    pub fn calls(&self) -> &[ProbeCall] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Index of the call whose text contains `offset`.
    pub fn call_at(&self, offset: usize) -> Option<usize> {
        let i = self.calls.partition_point(|c| c.range.end <= offset);
        self.calls
            .get(i)
            .filter(|c| c.range.start <= offset)
            .map(|_| i)
    }

    /// Offset in the text with every call removed.
    ///
    /// Offsets inside a call map to the statement the call precedes.
    pub fn original_offset(&self, offset: usize) -> usize {
        let mut removed = 0;
        for call in &self.calls {
            if call.range.end <= offset {
                removed += call.range.len();
            } else {
                if call.range.start <= offset {
                    return call.range.start - removed;
                }
                break;
            }
        }
        offset - removed
    }

    /// The text without any probe call.
    pub fn strip(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for call in &self.calls {
            out.push_str(&text[cursor..call.range.start]);
            cursor = call.range.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Calls after `call` that keep capturing `name` without a break.
    pub fn run_after(&self, call: usize, name: &str) -> impl Iterator<Item = usize> + '_ {
        let name = name.to_string();
        (call + 1..self.calls.len()).take_while(move |&i| self.calls[i].captures(&name))
    }

    /// Rewrite `text` without the given captures and calls.
    pub fn remove(&self, text: &str, removals: &[Removal]) -> String {
        let mut edits: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        let mut whole = Vec::new();
        for removal in removals {
            match removal {
                Removal::Capture { call, name } if *call < self.calls.len() => {
                    edits.entry(*call).or_default().push(name.as_str());
                }
                Removal::Call(call) if *call < self.calls.len() => whole.push(*call),
                _ => {}
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (i, call) in self.calls.iter().enumerate() {
            if whole.contains(&i) {
                out.push_str(&text[cursor..call.range.start]);
                cursor = call.range.end;
            } else if let Some(dropped) = edits.get(&i) {
                out.push_str(&text[cursor..call.args.start]);
                out.push_str(&call.render_args(dropped));
                cursor = call.args.end;
            }
        }
        out.push_str(&text[cursor..]);
        out
    }
}

fn parse_call(text: &str, start: usize) -> Option<ProbeCall> {
    let open = start + PROBE_MACRO.len();
    if text.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let args_start = open + 1;
    let close = args_start + text[args_start..].find(')')?;
    let args = &text[args_start..close];

    let (head, tail) = match args.split_once(';') {
        Some((head, tail)) => (head, Some(tail)),
        None => (args, None),
    };
    let (span_start, span_len) = head.split_once(',')?;
    let span_start: usize = span_start.trim().parse().ok()?;
    let span_len: usize = span_len.trim().parse().ok()?;

    let mut captures = Vec::new();
    if let Some(tail) = tail {
        let mut pos = args_start + head.len() + 1;
        for part in tail.split(',') {
            let name = part.trim();
            let lead = part.len() - part.trim_start().len();
            if !name.is_empty() {
                captures.push((name.to_string(), pos + lead..pos + lead + name.len()));
            }
            pos += part.len() + 1;
        }
    }

    let semi = close + 1;
    if text.as_bytes().get(semi) != Some(&b';') {
        return None;
    }
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let own_line = text[line_start..start].chars().all(|c| c == ' ' || c == '\t');
    let range = match text.as_bytes().get(semi + 1) {
        Some(b'\n') if own_line => line_start..semi + 2,
        Some(b' ') if !own_line => start..semi + 2,
        _ => start..semi + 1,
    };

    Some(ProbeCall {
        range,
        args: args_start..close,
        span: Span {
            start: span_start,
            len: span_len,
        },
        captures,
    })
}
