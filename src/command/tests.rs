use super::*;

#[test]
fn mock_matches_expected_command_and_context() {
    let ctx = Context::Local {
        user: "test".into(),
    };
    let mut mock = CommandMock {
        commands: vec![("sudo btrfs subvolume delete /tmp/foo".into(), ctx.clone())],
        responses: vec![Ok(String::new())],
    };

    assert!(mock.run("sudo btrfs subvolume delete /tmp/foo", &ctx).is_ok());
}

#[test]
#[should_panic]
fn mock_panics_on_unexpected_command() {
    let ctx = Context::Local {
        user: "test".into(),
    };
    let mut mock = CommandMock {
        commands: vec![("expected".into(), ctx.clone())],
        responses: vec![Ok(String::new())],
    };

    let _ = mock.run("not expected", &ctx);
}

#[test]
fn mock_run_piped_returns_last_response() {
    let ctx = Context::Local {
        user: "test".into(),
    };
    let mut mock = CommandMock {
        commands: vec![("a".into(), ctx.clone()), ("b".into(), ctx.clone())],
        responses: vec![Ok("first".into()), Ok("second".into())],
    };

    assert_eq!(
        mock.run_piped(&[("a", &ctx), ("b", &ctx)]).unwrap(),
        "second"
    );
}
