use bimap::BiBTreeMap;

use super::{AssembledProgram, ErrorKind, MapResolver, assemble, assemble_with};
use crate::include_test_file;
use crate::isa::Sw8Isa;

fn assemble_ok(source: &str) -> AssembledProgram {
    assemble(source).unwrap_or_else(|error| {
        panic!("Assembly error on line {}: {}", error.line, error.kind);
    })
}

/// Flattens a program expected to hold exactly one section.
fn only_section(program: &AssembledProgram) -> (u16, &[u8]) {
    assert_eq!(program.sections.len(), 1, "expected exactly one section");
    (program.sections[0].origin, &program.sections[0].bytes)
}

#[test]
fn counting_loop() {
    let program = assemble_ok(include_test_file!("counting-loop.asm"));
    let (origin, bytes) = only_section(&program);

    assert_eq!(origin, 0);
    assert_eq!(
        bytes,
        [
            0x30, 0x00, 0x05, // ldi a, 5
            0x11, 0x00, // dec a
            0x42, 0x03, 0x00, // jnz loop
            0x01, // hlt
        ]
    );
    assert_eq!(program.symbols.get("loop"), Some(&3));

    let expected_map: BiBTreeMap<u16, usize> =
        [(0, 3), (3, 5), (5, 6), (8, 7)].iter().cloned().collect();
    assert_eq!(program.source_map, expected_map);
}

#[test]
fn placed_sections_with_data() {
    let program = assemble_ok(include_test_file!("sections.asm"));
    assert_eq!(program.sections.len(), 2);

    assert_eq!(program.sections[0].origin, 0x0100);
    assert_eq!(
        program.sections[0].bytes,
        [
            0x30, 0x00, 0x02, // ldi a, table / 256
            0x31, 0x01, 0x00, 0x02, // ld b, table
            0x01, // hlt
        ]
    );

    assert_eq!(program.sections[1].origin, 0x0200);
    assert_eq!(
        program.sections[1].bytes,
        [
            0x01, 0x02, 0x03, // .db 1, 2, 3
            0x68, 0x69, // "hi"
            0x00, 0x01, // .dw start
            0xEF, 0xBE, // .dw $BEEF
        ]
    );

    assert_eq!(program.symbols.get("start"), Some(&0x0100));
    assert_eq!(program.symbols.get("table"), Some(&0x0200));
}

#[test]
fn macros_and_defines() {
    let program = assemble_ok(include_test_file!("macros.asm"));
    let (_, bytes) = only_section(&program);

    assert_eq!(
        bytes,
        [
            0x30, 0x00, 0x07, // ldi a, 7
            0x16, 0x00, // out a
            0x30, 0x01, 0x08, // ldi b, 7 + 1
            0x16, 0x01, // out b
            0x01, // hlt
        ]
    );
}

#[test]
fn label_after_byte_data() {
    let program = assemble_ok(".org 0x10\n.db 1, 2, 3\nafter:\nhlt");
    assert_eq!(program.symbols.get("after"), Some(&0x13));
}

#[test]
fn forward_reference_resolves() {
    let program = assemble_ok("jmp end\nnop\nend:\nhlt");
    let (_, bytes) = only_section(&program);
    assert_eq!(bytes, [0x40, 0x04, 0x00, 0x00, 0x01]);
    assert_eq!(program.symbols.get("end"), Some(&4));
}

#[test]
fn register_pair_packs_into_one_byte() {
    let program = assemble_ok("mov a, b");
    assert_eq!(only_section(&program).1, [0x20, 0x01]);

    let program = assemble_ok("mov d, c");
    assert_eq!(only_section(&program).1, [0x20, 0x32]);
}

#[test]
fn literal_conventions_encode_identically() {
    for literal in ["10", "$0A", "0x0A", "0Ah", "%1010", "0b1010", "1010b"] {
        let program = assemble_ok(&format!("ldi a, {}", literal));
        assert_eq!(only_section(&program).1, [0x30, 0x00, 0x0A], "literal {}", literal);
    }
}

#[test]
fn expression_precedence_in_operands() {
    let program = assemble_ok("ldi a, 2 + 3 * 4");
    assert_eq!(only_section(&program).1, [0x30, 0x00, 0x0E]);

    let program = assemble_ok("ldi a, (2 + 3) * 4");
    assert_eq!(only_section(&program).1, [0x30, 0x00, 0x14]);

    let program = assemble_ok("ldi a, -128");
    assert_eq!(only_section(&program).1, [0x30, 0x00, 0x80]);
}

#[test]
fn words_are_little_endian() {
    let program = assemble_ok(".dw 0x1234, -2");
    assert_eq!(only_section(&program).1, [0x34, 0x12, 0xFE, 0xFF]);
}

#[test]
fn byte_strings_with_escapes() {
    let program = assemble_ok(".db \"Hi\\0\", 'x'");
    assert_eq!(only_section(&program).1, [0x48, 0x69, 0x00, 0x78]);
}

#[test]
fn string_in_word_data_is_rejected() {
    let error = assemble(".dw \"no\"").unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidOperand);
    assert_eq!(error.line, 1);
}

#[test]
fn unterminated_string_is_rejected() {
    let error = assemble(".db \"oops").unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidStringLiteral);
}

#[test]
fn undefined_symbol_names_the_line() {
    let error = assemble("nop\njmp nowhere").unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol("nowhere".to_string()));
    assert_eq!(error.line, 2);
}

#[test]
fn duplicate_label_blames_second_definition() {
    let error = assemble("x:\nnop\nx:\nhlt").unwrap_err();
    assert_eq!(error.kind, ErrorKind::DuplicateLabelDefinition("x".to_string()));
    assert_eq!(error.line, 3);
}

#[test]
fn label_names_are_case_sensitive() {
    let program = assemble_ok("Loop:\nnop\nloop:\nhlt");
    assert_eq!(program.symbols.get("Loop"), Some(&0));
    assert_eq!(program.symbols.get("loop"), Some(&1));
}

#[test]
fn malformed_labels() {
    let error = assemble(":").unwrap_err();
    assert_eq!(error.kind, ErrorKind::EmptyLabelDefinition);

    let error = assemble("1abc:").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::InvalidLabelDefinition(_)));
}

#[test]
fn untaken_branch_contributes_nothing() {
    // the same label in both branches is not a duplicate, and the untaken
    // branch never advances the location counter
    let source = ".if 1\nx:\nnop\n.else\nx:\nhlt\n.endif\njmp x";
    let program = assemble_ok(source);
    let (_, bytes) = only_section(&program);
    assert_eq!(bytes, [0x00, 0x40, 0x00, 0x00]);
}

#[test]
fn overlapping_sections_are_rejected() {
    let error = assemble(".org 0\n.db 1, 2, 3, 4\n.org 2\n.db 5").unwrap_err();
    assert_eq!(error.kind, ErrorKind::SectionOverlap);
    assert_eq!(error.line, 3);
}

#[test]
fn origin_must_fit_the_address_space() {
    let error = assemble(".org 0x10000").unwrap_err();
    assert_eq!(error.kind, ErrorKind::ExpressionOverflow);
}

#[test]
fn origin_cannot_reference_forward() {
    let error = assemble(".org later\nlater:\nnop").unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol("later".to_string()));
    assert_eq!(error.line, 1);
}

#[test]
fn comment_only_source_is_effectively_empty() {
    let program = assemble_ok("; nothing here\n\n  ; still nothing");
    assert!(program.is_effectively_empty());
    assert!(program.sections.is_empty());
}

#[test]
fn immediate_overflow() {
    let error = assemble("ldi a, 256").unwrap_err();
    assert_eq!(error.kind, ErrorKind::ExpressionOverflow);

    let error = assemble("ldi a, -129").unwrap_err();
    assert_eq!(error.kind, ErrorKind::ExpressionOverflow);

    let error = assemble(".db 256").unwrap_err();
    assert_eq!(error.kind, ErrorKind::ExpressionOverflow);
}

#[test]
fn unknown_mnemonic() {
    let error = assemble("frobnicate a").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::EncodingUnsupported(_)));
    assert_eq!(error.line, 1);
}

#[test]
fn wrong_operand_shapes() {
    // register where an expression belongs and vice versa
    let error = assemble("jmp a").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::EncodingUnsupported(_)));

    let error = assemble("inc 5").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::EncodingUnsupported(_)));

    let error = assemble("nop a").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::EncodingUnsupported(_)));
}

#[test]
fn include_and_visibility() {
    let mut resolver = MapResolver::default();
    resolver.insert("lib.asm", "public mul8:\nret\nprivate scratch:\nret");

    let program = assemble_with(
        ".include \"lib.asm\"\ncall mul8\nhlt",
        &Sw8Isa,
        &resolver,
    )
    .unwrap();
    let (_, bytes) = only_section(&program);
    assert_eq!(bytes, [0x02, 0x02, 0x45, 0x00, 0x00, 0x01]);

    // a private label is invisible outside its file
    let error =
        assemble_with(".include \"lib.asm\"\ncall scratch", &Sw8Isa, &resolver).unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol("scratch".to_string()));
    assert_eq!(error.line, 2);
}

#[test]
fn protected_labels_reach_direct_includers_only() {
    let mut resolver = MapResolver::default();
    resolver.insert("mid.asm", ".include \"leaf.asm\"\njmp near");
    resolver.insert("leaf.asm", "protected near:\npublic deep:\nret");

    // mid references the protected label directly, the root reaches the
    // public one transitively
    let program = assemble_with(".include \"mid.asm\"\njmp deep", &Sw8Isa, &resolver).unwrap();
    let (_, bytes) = only_section(&program);
    assert_eq!(bytes, [0x02, 0x40, 0x00, 0x00, 0x40, 0x00, 0x00]);

    let error = assemble_with(".include \"mid.asm\"\njmp near", &Sw8Isa, &resolver).unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol("near".to_string()));
}

#[test]
fn include_line_numbers_are_per_file() {
    let mut resolver = MapResolver::default();
    resolver.insert("bad.asm", "nop\njmp missing");

    let error = assemble_with("nop\nnop\nnop\n.include \"bad.asm\"", &Sw8Isa, &resolver)
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol("missing".to_string()));
    assert_eq!(error.line, 2);
}

#[test]
fn missing_include() {
    let error = assemble(".include \"ghost.asm\"").unwrap_err();
    assert_eq!(error.kind, ErrorKind::IncludeNotFound("ghost.asm".to_string()));
}

#[test]
fn recursive_macro_is_rejected() {
    let error = assemble(".macro m\nm\n.endmacro\nm").unwrap_err();
    assert!(matches!(error.kind, ErrorKind::InvalidDirective(_)));
}

#[test]
fn labels_resolve_inside_word_data() {
    let program = assemble_ok("entry:\nnop\n.dw entry + 2");
    let (_, bytes) = only_section(&program);
    assert_eq!(bytes, [0x00, 0x02, 0x00]);
}

#[test]
fn randomized_register_programs() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fmt::Write;

    let seed = [42u8; 32];
    let mut rng = StdRng::from_seed(seed);

    for i in 0..100 {
        let mut source = String::new();
        let mut expected_len = 0usize;

        let num_instructions = rng.random_range(5..20);
        for _ in 0..num_instructions {
            let (text, len) = random_instruction(&mut rng);
            writeln!(source, "{}", text).unwrap();
            expected_len += len;
        }

        let program = assemble(&source).unwrap_or_else(|error| {
            panic!(
                "Test {}: program failed to assemble:\n{}\nline {}: {}",
                i, source, error.line, error.kind
            );
        });
        let total: usize = program.sections.iter().map(|s| s.bytes.len()).sum();
        assert_eq!(total, expected_len, "Test {}: length mismatch:\n{}", i, source);
    }
}

fn random_instruction<R: rand::Rng>(rng: &mut R) -> (String, usize) {
    let registers = ["a", "b", "c", "d"];
    let reg = |rng: &mut R| registers[rng.random_range(0..registers.len())];

    match rng.random_range(0..5) {
        0 => {
            let ops = ["nop", "hlt", "ret"];
            (ops[rng.random_range(0..ops.len())].to_string(), 1)
        }
        1 => {
            let ops = ["inc", "dec", "not", "push", "pop", "in", "out"];
            let op = ops[rng.random_range(0..ops.len())];
            (format!("{} {}", op, reg(rng)), 2)
        }
        2 => {
            let ops = ["mov", "add", "sub", "and", "or", "xor", "cmp"];
            let op = ops[rng.random_range(0..ops.len())];
            (format!("{} {}, {}", op, reg(rng), reg(rng)), 2)
        }
        3 => {
            let imm = rng.random_range(-128..256);
            (format!("ldi {}, {}", reg(rng), imm), 3)
        }
        _ => {
            let addr = rng.random_range(0..0x10000);
            let op = if rng.random_bool(0.5) { "ld" } else { "st" };
            (format!("{} {}, {}", op, reg(rng), addr), 4)
        }
    }
}
