use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close(s: &str) -> Option<&str> {
    let s = s.trim();
    let j = s.find(')')?;
    Some(s[..j].trim())
}

fn slot_is_const(kind: &str, line: &str) -> bool {
    match kind {
        "reg" => false,
        "const" => true,
        other => panic!("bad operand kind `{other}` in: {line}"),
    }
}

fn flag(v: &str, line: &str) -> i32 {
    match v {
        "0" => 0,
        "1" => 1,
        other => panic!("bad flag `{other}` in: {line}"),
    }
}

fn rule_source(args: &[&str], line: &str) -> String {
    let simple = match args[0] {
        "none" => Some("None"),
        "kidx_b" => Some("ConstIndexB"),
        "k_b" => Some("ConstB"),
        "k_c" => Some("ConstC"),
        "k_bc" => Some("ConstBC"),
        "skip_c" => Some("SkipNext"),
        "jump" => Some("Jump"),
        "loop_prep" => Some("LoopPrep"),
        "count_b" => Some("CountB"),
        "count_c" => Some("CountC"),
        "count_bc" => Some("CountBC"),
        "ret_count" => Some("ReturnCount"),
        "list_count" => Some("ListCount"),
        "clear_b" => Some("ClearB"),
        _ => None,
    };
    if let Some(name) = simple {
        if args.len() != 1 {
            panic!("rule `{}` takes no arguments: {line}", args[0]);
        }
        return format!("Normalize::{name}");
    }

    match (args[0], args.len()) {
        ("cmp", 4) => format!(
            "Normalize::Compare {{ b_const: {}, c_const: {}, flag: {} }}",
            slot_is_const(args[1], line),
            slot_is_const(args[2], line),
            flag(args[3], line)
        ),
        ("test", 2) => format!("Normalize::Test {{ flag: {} }}", flag(args[1], line)),
        ("testset", 2) => format!("Normalize::TestSet {{ flag: {} }}", flag(args[1], line)),
        _ => panic!("unknown normalization rule in: {line}"),
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);

    let def_path = root.join("catalog").join("moonsec-v3.def");
    println!("cargo:rerun-if-changed={}", def_path.display());

    let def_src = fs::read_to_string(&def_path).expect("read moonsec-v3.def");

    let mut ops: Vec<(String, String)> = Vec::new();
    let mut shapes: Vec<(String, String, String)> = Vec::new();

    for line in def_src.lines() {
        let l = line.trim();
        if let Some(rest) = l.strip_prefix("OP(") {
            let inner = match take_until_paren_close(rest) {
                Some(v) => v,
                None => continue,
            };
            let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
            if parts.len() != 2 {
                panic!("malformed opcode line: {l}");
            }
            ops.push((parts[0].to_string(), parts[1].to_string()));
            continue;
        }

        let rest = match l.strip_prefix("SHAPE(") {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        if parts.len() < 3 {
            panic!("malformed shape line: {l}");
        }
        let fingerprint = parts[0];
        if fingerprint.is_empty() || !fingerprint.bytes().all(|b| b.is_ascii_digit()) {
            panic!("fingerprint must be decimal digits: {l}");
        }
        shapes.push((
            fingerprint.to_string(),
            parts[1].to_string(),
            rule_source(&parts[2..], l),
        ));
    }

    let variants: HashSet<&str> = ops.iter().map(|(v, _)| v.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for (fingerprint, variant, _) in &shapes {
        if !variants.contains(variant.as_str()) {
            panic!("shape {fingerprint} names unknown opcode {variant}");
        }
        if !seen.insert(fingerprint.as_str()) {
            panic!("duplicate handler fingerprint {fingerprint}");
        }
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let mut out = String::new();
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]\n");
    out.push_str("pub enum OpCode {\n");
    for (variant, _) in &ops {
        out.push_str(&format!("    {},\n", variant));
    }
    out.push_str("}\n\n");

    out.push_str("#[derive(Debug, Clone, Copy)]\n");
    out.push_str("pub struct OpInfo {\n");
    out.push_str("    pub op: OpCode,\n");
    out.push_str("    pub name: &'static str,\n");
    out.push_str("}\n\n");

    out.push_str(&format!("pub const OPCODE_COUNT: usize = {};\n\n", ops.len()));
    out.push_str("pub const OPCODE_INFO: &[OpInfo] = &[\n");
    for (variant, mnemonic) in &ops {
        out.push_str(&format!(
            "    OpInfo {{ op: OpCode::{}, name: \"{}\" }},\n",
            variant, mnemonic
        ));
    }
    out.push_str("];\n");
    fs::write(out_dir.join("opcodes.rs"), out).expect("write generated opcode table");

    let mut out = String::new();
    out.push_str("pub const HANDLER_SHAPES: &[HandlerShape] = &[\n");
    for (fingerprint, variant, rule) in &shapes {
        out.push_str(&format!(
            "    HandlerShape {{ fingerprint: \"{}\", op: OpCode::{}, rule: {} }},\n",
            fingerprint, variant, rule
        ));
    }
    out.push_str("];\n");
    fs::write(out_dir.join("handler_shapes.rs"), out).expect("write generated shape table");
}
