#![cfg(test)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::plugin_system::error::ErrorKind;
use crate::plugin_system::hooks::{HookContext, HookPoint, HookRegistry};

fn context(point: HookPoint) -> HookContext {
    HookContext {
        point,
        plugin_id: "subject".to_string(),
        path: Some(PathBuf::from("/plugins/subject.mock")),
    }
}

#[test]
fn hooks_run_in_registration_order() {
    let hooks = HookRegistry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let calls = Arc::clone(&calls);
        hooks.register(HookPoint::PreLoad, move |ctx| {
            calls.lock().unwrap().push(format!("{}:{}", label, ctx.plugin_id));
            Ok(())
        });
    }

    hooks.run(&context(HookPoint::PreLoad)).unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["first:subject", "second:subject", "third:subject"]
    );
    // Other points are unaffected
    hooks.run(&context(HookPoint::PreUnload)).unwrap();
    assert_eq!(calls.lock().unwrap().len(), 3);
}

#[test]
fn first_failure_vetoes_and_stops() {
    let hooks = HookRegistry::new();
    let reached = Arc::new(Mutex::new(false));
    hooks.register(HookPoint::PreUnload, |_| Err("not today".to_string()));
    let flag = Arc::clone(&reached);
    hooks.register(HookPoint::PreUnload, move |_| {
        *flag.lock().unwrap() = true;
        Ok(())
    });

    let err = hooks.run(&context(HookPoint::PreUnload)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert!(err.to_string().contains("not today"));
    assert!(!*reached.lock().unwrap());
}

#[test]
fn panicking_hook_counts_as_failure() {
    let hooks = HookRegistry::new();
    hooks.register(HookPoint::PreLoad, |_| panic!("hook exploded"));

    let err = hooks.run(&context(HookPoint::PreLoad)).unwrap_err();
    assert!(err.to_string().contains("panicked"));
}

#[test]
fn run_all_collects_every_failure() {
    let hooks = HookRegistry::new();
    hooks.register(HookPoint::PostLoad, |_| Err("one".to_string()));
    hooks.register(HookPoint::PostLoad, |_| Ok(()));
    hooks.register(HookPoint::PostLoad, |_| Err("two".to_string()));

    let failures = hooks.run_all(&context(HookPoint::PostLoad));
    assert_eq!(failures.len(), 2);
}

#[test]
fn removed_hooks_no_longer_run() {
    let hooks = HookRegistry::new();
    let first = hooks.register(HookPoint::PreLoad, |_| Err("veto".to_string()));
    let second = hooks.register(HookPoint::PostLoad, |_| Ok(()));
    assert_ne!(first, second);
    assert_eq!(hooks.count(HookPoint::PreLoad), 1);

    assert!(hooks.remove(first));
    assert!(!hooks.remove(first));
    assert_eq!(hooks.count(HookPoint::PreLoad), 0);
    hooks.run(&context(HookPoint::PreLoad)).unwrap();
}
