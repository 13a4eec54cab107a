mod common;

use std::panic;

use common::{init_logging, SideEffects};
use effweave_control::{
    async_to_native, await_, bracket_, catch, error_to_native, from_either, from_exception,
    general_bracket, on_exception, raise, resource_to_native, run_async_sequential, run_error,
    run_resource, spawn, throw, Exit,
};
use effweave_core::Eff;

#[derive(Debug, Clone, PartialEq)]
struct MyExc(&'static str);

#[derive(Clone, Copy, Debug)]
enum Strategy {
    Local,
    NativeResource,
    Native,
}

const STRATEGIES: [Strategy; 3] = [Strategy::Local, Strategy::NativeResource, Strategy::Native];

impl Strategy {
    fn run<A: Send + 'static>(self, body: Eff<A>) -> Result<A, MyExc> {
        match self {
            Strategy::Local => run_error(run_resource(body)).run(),
            Strategy::NativeResource => run_error(resource_to_native(body)).run(),
            Strategy::Native => error_to_native(resource_to_native(body)).run(),
        }
    }
}

fn exit_label(exit: Exit<&u8>) -> String {
    match exit {
        Exit::Success(n) => format!("success {n}"),
        Exit::Failure => "failure".to_string(),
        Exit::Aborted => "aborted".to_string(),
    }
}

fn tracked_bracket(log: &SideEffects, use_: Eff<u8>) -> Eff<u8> {
    let release_log = log.clone();
    general_bracket(
        log.record("acquire").map(|()| "handle"),
        move |_, exit| release_log.record(format!("release {}", exit_label(exit))),
        move |_| use_,
    )
    .map(|(used, ())| used)
}

#[test]
fn bracket_cleanup_runs_once_on_success() {
    init_logging();
    for strategy in STRATEGIES {
        let log = SideEffects::default();
        let outcome = strategy.run(tracked_bracket(&log, Eff::pure(9)));
        assert_eq!(outcome, Ok(9), "{strategy:?}");
        assert_eq!(log.lines(), vec!["acquire", "release success 9"], "{strategy:?}");
    }
}

#[test]
fn bracket_cleanup_runs_once_on_throw() {
    init_logging();
    for strategy in STRATEGIES {
        let log = SideEffects::default();
        let outcome = strategy.run(tracked_bracket(&log, throw(MyExc("in use"))));
        assert_eq!(outcome, Err(MyExc("in use")), "{strategy:?}");

        // A local throw under the native resource interpreter is a
        // short-circuit; under the local one, and natively, a failure.
        let expected = match strategy {
            Strategy::NativeResource => "release aborted",
            Strategy::Local | Strategy::Native => "release failure",
        };
        assert_eq!(log.lines(), vec!["acquire", expected], "{strategy:?}");
    }
}

#[test]
fn bracket_cleanup_runs_once_when_error_is_caught_outside() {
    for strategy in STRATEGIES {
        let log = SideEffects::default();
        let body = catch(tracked_bracket(&log, throw(MyExc("x"))), |_: MyExc| Eff::pure(0_u8));
        assert_eq!(strategy.run(body), Ok(0), "{strategy:?}");
        assert_eq!(log.lines().len(), 2, "{strategy:?}");
    }
}

#[test]
fn cleanup_precedes_error_result() {
    for strategy in STRATEGIES {
        let log = SideEffects::default();
        let body = on_exception(throw::<MyExc, ()>(MyExc("hello")), log.record("marker"));
        assert_eq!(strategy.run(body), Err(MyExc("hello")), "{strategy:?}");
        assert_eq!(log.lines(), vec!["marker"], "{strategy:?}");
    }
}

#[test]
fn bracket_wrapped_throw_under_native_error() {
    let log = SideEffects::default();
    let observed = log.clone();
    let body = bracket_(Eff::unit(), log.record("cleanup"), throw::<MyExc, ()>(MyExc("hello")));
    // Read the log inside the stack, as soon as the error interpreter has
    // produced its result.
    let eff = error_to_native::<MyExc, ()>(resource_to_native(body))
        .map(move |outcome| (outcome, observed.lines()));
    let (outcome, seen) = eff.run();
    assert_eq!(outcome, Err(MyExc("hello")));
    assert_eq!(seen, vec!["cleanup"]);
}

#[test]
fn nested_native_error_interpreters_are_isolated() {
    let caught = raise::<(), ()>(catch(throw(()), |()| Eff::unit()));
    let eff = error_to_native::<(), _>(error_to_native::<(), _>(caught));
    assert_eq!(eff.run(), Ok(Ok(())));

    let uncaught = raise::<(), ()>(throw(()));
    let eff = error_to_native::<(), _>(error_to_native::<(), _>(uncaught));
    assert_eq!(eff.run(), Err(()));
}

#[test]
fn inner_native_interpreter_does_not_catch_outer_throw() {
    // The outer catch is served by the outer interpreter even though the
    // throw passes through the inner interpreter's scope.
    let body = raise::<(), bool>(catch(
        error_to_native::<(), ()>(raise::<(), ()>(throw(()))).map(|inner| inner.is_ok()),
        |()| Eff::pure(false),
    ));
    assert_eq!(error_to_native::<(), _>(error_to_native::<(), _>(body)).run(), Ok(Ok(false)));
}

#[test]
fn awaited_task_error_propagates() {
    init_logging();
    let uncaught = || spawn(throw::<(), ()>(())).and_then(await_);
    assert_eq!(error_to_native::<(), _>(async_to_native(uncaught())).run(), Err(()));
    assert_eq!(async_to_native(error_to_native::<(), _>(uncaught())).run(), Err(()));
    assert_eq!(run_error::<(), _>(async_to_native(uncaught())).run(), Err(()));
    assert_eq!(run_error::<(), _>(run_async_sequential(uncaught())).run(), Err(()));
}

#[test]
fn awaited_task_error_is_catchable() {
    let recovered = || {
        spawn(throw::<(), ()>(()))
            .and_then(|task| catch(await_(task), |()| Eff::pure(Some(()))))
    };
    assert_eq!(error_to_native::<(), _>(async_to_native(recovered())).run(), Ok(Some(())));
    assert_eq!(run_error::<(), _>(async_to_native(recovered())).run(), Ok(Some(())));
    assert_eq!(error_to_native::<(), _>(run_async_sequential(recovered())).run(), Ok(Some(())));
}

#[test]
fn from_exception_lifts_matching_panics() {
    let raising = from_exception::<MyExc, ()>(|| panic::resume_unwind(Box::new(MyExc("hello"))));
    assert_eq!(run_error::<MyExc, ()>(raising).run(), Err(MyExc("hello")));

    let quiet = from_exception::<MyExc, ()>(|| ());
    assert_eq!(run_error::<MyExc, ()>(quiet).run(), Ok(()));
}

#[test]
fn from_exception_leaves_other_panics_alone() {
    let raising = from_exception::<MyExc, ()>(|| panic::resume_unwind(Box::new(17_u32)));
    let payload = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        run_error::<MyExc, ()>(raising).run()
    }))
    .unwrap_err();
    assert_eq!(payload.downcast_ref::<u32>(), Some(&17));
}

#[test]
fn from_either_round_trip() {
    assert_eq!(run_error::<MyExc, u8>(from_either::<MyExc, u8>(Ok(4))).run(), Ok(4));
    assert_eq!(
        run_error::<MyExc, u8>(from_either(Err(MyExc("left")))).run(),
        run_error::<MyExc, u8>(throw(MyExc("left"))).run()
    );
    // The right case sends no request at all.
    assert_eq!(from_either::<MyExc, u8>(Ok(4)).try_run().ok(), Some(4));
}
