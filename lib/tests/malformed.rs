use stackmap::jvm::code::{BranchInstruction::*, Instruction, Instruction::*, OrdComparison};
use stackmap::jvm::verifier::StackMapGenerator;
use stackmap::jvm::*;
use stackmap::util::Offset;

fn frames_for(descriptor: &str, max_stack: u16, code: Vec<Instruction>) -> Result<usize, Error> {
    let mut method = Method::new(
        BinaryName::from_str("Foo").unwrap(),
        UnqualifiedName::from_str("test").unwrap(),
        descriptor,
        MethodAccessFlags::STATIC,
    )?;
    method.max_stack = max_stack;
    method.instructions = code;
    let frames = StackMapGenerator::default().stack_map_frames(&method)?;
    Ok(frames.len())
}

fn malformed_kind(result: Result<usize, Error>) -> MalformedKind {
    match result {
        Err(Error::MalformedBytecode { kind, .. }) => kind,
        other => panic!("expected malformed bytecode, got {:?}", other),
    }
}

fn verifier_kind(result: Result<usize, Error>) -> (Offset, VerifierErrorKind) {
    match result {
        Err(Error::UnverifiableCode { offset, kind }) => (offset, kind),
        other => panic!("expected unverifiable code, got {:?}", other),
    }
}

#[test]
fn structural_defects() {
    assert_eq!(malformed_kind(frames_for("()V", 0, vec![])), MalformedKind::EmptyCode);

    // `goto` into the middle of `sipush`
    assert_eq!(
        malformed_kind(frames_for(
            "()V",
            1,
            vec![SiPush(1), Pop, Branch(Goto(Offset(1)))]
        )),
        MalformedKind::InvalidBranchTarget(Offset(1))
    );

    // Conditional jump past the end
    assert_eq!(
        malformed_kind(frames_for(
            "(I)V",
            1,
            vec![ILoad(0), Branch(If(OrdComparison::EQ, Offset(10))), Branch(Return)]
        )),
        MalformedKind::InvalidBranchTarget(Offset(10))
    );

    assert_eq!(
        malformed_kind(frames_for("()V", 1, vec![IConst0, Pop])),
        MalformedKind::FallsOffEnd
    );

    // Nothing jumps to the `nop`
    assert_eq!(
        malformed_kind(frames_for("()V", 0, vec![Branch(Return), Nop, Branch(Return)])),
        MalformedKind::UnreachableCode
    );

    // `(JJ)V` needs four locals
    let mut method = Method::new(
        BinaryName::from_str("Foo").unwrap(),
        UnqualifiedName::from_str("test").unwrap(),
        "(JJ)V",
        MethodAccessFlags::STATIC,
    )
    .unwrap();
    method.max_locals = 3;
    method.instructions = vec![Branch(Return)];
    assert!(matches!(
        StackMapGenerator::default().stack_map_frames(&method),
        Err(Error::MalformedBytecode {
            kind: MalformedKind::TooManyParameters {
                needed: 4,
                max_locals: 3
            },
            ..
        })
    ));
}

#[test]
fn type_errors() {
    let (offset, kind) = verifier_kind(frames_for("()V", 1, vec![Pop, Branch(Return)]));
    assert_eq!(offset, Offset(0));
    assert_eq!(kind, VerifierErrorKind::EmptyStack);

    let (offset, kind) = verifier_kind(frames_for(
        "()V",
        1,
        vec![IConst0, IConst1, Pop2, Branch(Return)],
    ));
    assert_eq!(offset, Offset(1));
    assert_eq!(kind, VerifierErrorKind::StackOverflow(1));

    // `iadd` on a `long`
    let (offset, kind) = verifier_kind(frames_for(
        "(J)I",
        3,
        vec![LLoad(0), IConst1, IAdd, Branch(IReturn)],
    ));
    assert_eq!(offset, Offset(2));
    assert!(matches!(kind, VerifierErrorKind::InvalidType { .. }));

    // Local past `max_locals`
    let mut code = vec![ILoad(1), Branch(IReturn)];
    let (offset, kind) = verifier_kind(frames_for("(I)I", 1, code.clone()));
    assert_eq!(offset, Offset(0));
    assert_eq!(kind, VerifierErrorKind::InvalidIndex(1));
    code[0] = ILoad(0);
    assert_eq!(frames_for("(I)I", 1, code).unwrap(), 0);

    let (_, kind) = verifier_kind(frames_for("()I", 0, vec![Branch(Return)]));
    assert_eq!(kind, VerifierErrorKind::ReturnMismatch);
}
