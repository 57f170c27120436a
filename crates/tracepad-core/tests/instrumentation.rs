//! Properties of instrumented scripts.

use tracepad_core::instrument::{NodeKind, SourceUnit, instrument};

const SCRIPT: &str = r#"//! ```cargo
//! [dependencies]
//! ```
let names = vec!["ada", "grace"];
let mut total = 0;
for (i, name) in names.iter().enumerate() {
    let len = name.len();
    if len > 3 {
        total += len * i;
    } else {
        continue;
    }
}
let label = match total {
    0 => {
        let empty = "none";
        empty.to_string()
    }
    n => format!("{n}"),
};
while total > 0 {
    total -= 1;
}
println!("{label}");
loop {
    break;
}
"#;

fn variables_at<'a>(result: &'a tracepad_core::Instrumented, needle: &str) -> Vec<&'a str> {
    let start = SCRIPT.find(needle).unwrap();
    result
        .probes
        .iter()
        .find(|p| p.span.start == start)
        .unwrap_or_else(|| panic!("no probe for {needle:?}"))
        .variables
        .iter()
        .map(String::as_str)
        .collect()
}

#[test]
fn test_instrumented_script_still_parses() {
    let result = instrument(SCRIPT).unwrap();
    SourceUnit::parse(&result.text).unwrap();
}

#[test]
fn test_removing_probes_restores_original() {
    let result = instrument(SCRIPT).unwrap();
    let mut stripped = result.text.clone();
    for probe in &result.probes {
        stripped = stripped.replacen(&probe.render(), "", 1);
    }
    assert_eq!(stripped.trim_end(), SCRIPT.trim_end());
}

#[test]
fn test_probe_count_matches_statements_and_blocks() {
    let result = instrument(SCRIPT).unwrap();
    let unit = SourceUnit::parse(SCRIPT).unwrap();
    let statements = unit
        .trees()
        .flat_map(|t| t.nodes())
        .filter(|n| n.kind.is_probed_statement())
        .count();
    let blocks = unit
        .trees()
        .flat_map(|t| t.nodes())
        .filter(|n| n.kind.is_block())
        .count();
    let jumps = unit
        .trees()
        .flat_map(|t| t.nodes())
        .filter(|n| n.kind == NodeKind::Jump)
        .count();

    assert_eq!(jumps, 1);
    assert_eq!(result.probes.len(), statements + blocks);
}

#[test]
fn test_variables_follow_scopes() {
    let result = instrument(SCRIPT).unwrap();

    assert!(variables_at(&result, "let names").is_empty());
    assert_eq!(variables_at(&result, "let mut total"), ["names"]);
    assert_eq!(variables_at(&result, "for (i, name)"), ["names", "total"]);
    assert_eq!(
        variables_at(&result, "let len"),
        ["names", "total", "i", "name"]
    );
    assert_eq!(
        variables_at(&result, "total += len"),
        ["names", "total", "i", "name", "len"]
    );
    assert_eq!(
        variables_at(&result, "continue"),
        ["names", "total", "i", "name", "len"]
    );
    assert_eq!(
        variables_at(&result, "empty.to_string()"),
        ["names", "total", "empty"]
    );
    assert_eq!(
        variables_at(&result, "total -= 1"),
        ["names", "total", "label"]
    );
    assert_eq!(
        variables_at(&result, "println!"),
        ["names", "total", "label"]
    );
}

#[test]
fn test_shadowing_moves_name_to_end() {
    let src = "let x = 1;\nlet y = 2;\nlet x = x + y;\nprintln!(\"{x}\");\n";
    let result = instrument(src).unwrap();
    let last = result
        .probes
        .iter()
        .find(|p| src[p.span.start..].starts_with("println!"))
        .unwrap();
    assert_eq!(last.variables, ["y", "x"]);
}

#[test]
fn test_items_are_not_statements() {
    let src = "struct Point { x: i32 }\nuse std::fmt;\nlet p = Point { x: 1 };\n";
    let result = instrument(src).unwrap();
    // `let p` and the unit exit.
    assert_eq!(result.probes.len(), 2);
}

#[test]
fn test_method_bodies_get_their_own_scope() {
    let src = "struct Counter;\nimpl Counter {\n    fn bump(&self, by: u32) -> u32 {\n        let next = by + 1;\n        next\n    }\n}\nlet outer = 1;\n";
    let result = instrument(src).unwrap();

    let next = result
        .probes
        .iter()
        .find(|p| src[p.span.start..].starts_with("next\n"))
        .unwrap();
    assert_eq!(next.variables, ["by", "next"]);
    // Script locals never reach into method bodies.
    assert!(
        result
            .probes
            .iter()
            .filter(|p| p.span.start < src.find("let outer").unwrap())
            .all(|p| !p.variables.iter().any(|v| v == "outer"))
    );
}

#[test]
fn test_empty_script() {
    let result = instrument("").unwrap();
    assert_eq!(result.probes.len(), 1);
    assert_eq!(result.text, "\n::tracepad::probe!(0, 0);\n");
}
