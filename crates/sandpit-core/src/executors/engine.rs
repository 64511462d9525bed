// src/executors/engine.rs
//
// The compile-and-run capability. The coordinator only ever talks to the
// `ScriptEngine`/`ScriptSession` pair, so the interpreter behind it can be
// replaced without touching the execution control flow.

use boa_engine::{Context, JsValue, Source};
use serde::Deserialize;

use crate::channels::Channel;
use crate::errors::SandboxError;
use crate::value::ScriptValue;

const PRELUDE: &str = include_str!("prelude.js");

/// Which compiled form the snippet ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompiledForm {
    /// The whole source is a single expression whose value is returned.
    Expression,
    /// The source is a function body; only an explicit `return` yields a value.
    Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Compilation {
    Ready(CompiledForm),
    /// The source is not valid; carries the syntax error description.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// `None` when the snippet returned `undefined`.
    Returned(Option<ScriptValue>),
    Threw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A `console` call made by the snippet or one of its callbacks.
    Script,
    /// The error report of a callback that threw after the synchronous run.
    Late,
}

/// One console write, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub channel: Channel,
    pub origin: Origin,
    pub args: Vec<ScriptValue>,
}

/// Opens isolated sessions. Shared across executions and threads.
pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_session(&self) -> Result<Box<dyn ScriptSession>, SandboxError>;
}

/// One fresh script context, used by exactly one execution on one thread.
pub trait ScriptSession {
    fn compile(&mut self, source: &str, implicit_return: bool) -> Result<Compilation, SandboxError>;

    fn invoke(&mut self) -> Result<Invocation, SandboxError>;

    /// Run queued promise jobs until the queue is empty.
    fn run_microtasks(&mut self) -> Result<(), SandboxError>;

    /// Milliseconds after the start of `invoke` at which the earliest pending
    /// timer is due, or `None` when nothing is pending. Due times include the
    /// real time the snippet spent running before it scheduled the timer.
    fn next_timer_due(&mut self) -> Result<Option<u64>, SandboxError>;

    /// Run the earliest pending timer. Returns `false` when none is pending.
    fn fire_next_timer(&mut self) -> Result<bool, SandboxError>;

    /// Take every console write made since the previous drain.
    fn drain(&mut self) -> Result<Vec<Emission>, SandboxError>;
}

// ----------------- Wire format of the prelude -----------------

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum EncodedValue {
    Null,
    Undefined,
    Text { text: String },
    Json { text: String },
    Unserializable { reason: String },
}

impl From<EncodedValue> for ScriptValue {
    fn from(encoded: EncodedValue) -> Self {
        match encoded {
            EncodedValue::Null => ScriptValue::Null,
            EncodedValue::Undefined => ScriptValue::Undefined,
            EncodedValue::Text { text } => ScriptValue::Text(text),
            EncodedValue::Json { text } => match parse_structured(&text) {
                Ok(value) => ScriptValue::Structured(value),
                Err(e) => ScriptValue::Unserializable(e.to_string()),
            },
            EncodedValue::Unserializable { reason } => ScriptValue::Unserializable(reason),
        }
    }
}

/// Anything the engine managed to stringify is accepted, however deep.
fn parse_structured(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let value = serde_json::Value::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum CompileReply {
    Ready { form: CompiledForm },
    Rejected { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum InvokeReply {
    Returned { value: Option<EncodedValue> },
    Threw { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireChannel {
    Standard,
    Error,
}

#[derive(Debug, Deserialize)]
struct WireEmission {
    channel: WireChannel,
    origin: Origin,
    args: Vec<EncodedValue>,
}

impl From<WireEmission> for Emission {
    fn from(wire: WireEmission) -> Self {
        Emission {
            channel: match wire.channel {
                WireChannel::Standard => Channel::Standard,
                WireChannel::Error => Channel::Error,
            },
            origin: wire.origin,
            args: wire.args.into_iter().map(ScriptValue::from).collect(),
        }
    }
}

// ----------------- Boa implementation -----------------

/// JavaScript engine backed by `boa_engine`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoaEngine;

impl ScriptEngine for BoaEngine {
    fn name(&self) -> &'static str {
        "boa"
    }

    fn open_session(&self) -> Result<Box<dyn ScriptSession>, SandboxError> {
        Ok(Box::new(BoaSession::new()?))
    }
}

pub struct BoaSession {
    context: Context,
}

impl BoaSession {
    pub fn new() -> Result<Self, SandboxError> {
        let mut context = Context::default();
        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|e| SandboxError::Engine(format!("Failed to install prelude: {}", e)))?;
        Ok(Self { context })
    }

    fn call(&mut self, expression: &str) -> Result<JsValue, SandboxError> {
        self.context
            .eval(Source::from_bytes(expression))
            .map_err(|e| SandboxError::Engine(format!("Host call `{}` failed: {}", expression, e)))
    }

    fn call_for_json(&mut self, expression: &str) -> Result<String, SandboxError> {
        let value = self.call(expression)?;
        value
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| {
                SandboxError::Engine(format!("Host call `{}` did not return a string", expression))
            })
    }
}

impl ScriptSession for BoaSession {
    fn compile(&mut self, source: &str, implicit_return: bool) -> Result<Compilation, SandboxError> {
        let literal = serde_json::to_string(source)?;
        let reply = self.call_for_json(&format!(
            "__sandpit.compile({}, {})",
            literal, implicit_return
        ))?;
        Ok(match serde_json::from_str::<CompileReply>(&reply)? {
            CompileReply::Ready { form } => Compilation::Ready(form),
            CompileReply::Rejected { message } => Compilation::Rejected(message),
        })
    }

    fn invoke(&mut self) -> Result<Invocation, SandboxError> {
        let reply = self.call_for_json("__sandpit.invoke()")?;
        Ok(match serde_json::from_str::<InvokeReply>(&reply)? {
            InvokeReply::Returned { value } => Invocation::Returned(value.map(ScriptValue::from)),
            InvokeReply::Threw { message } => Invocation::Threw(message),
        })
    }

    fn run_microtasks(&mut self) -> Result<(), SandboxError> {
        self.context.run_jobs();
        Ok(())
    }

    fn next_timer_due(&mut self) -> Result<Option<u64>, SandboxError> {
        let due = self
            .call("__sandpit.nextDue()")?
            .as_number()
            .ok_or_else(|| SandboxError::Engine("nextDue() did not return a number".to_string()))?;
        Ok(if due < 0.0 { None } else { Some(due as u64) })
    }

    fn fire_next_timer(&mut self) -> Result<bool, SandboxError> {
        let fired = self.call("__sandpit.fireNext()")?;
        Ok(fired.as_boolean().unwrap_or(false))
    }

    fn drain(&mut self) -> Result<Vec<Emission>, SandboxError> {
        let batch = self.call_for_json("__sandpit.drain()")?;
        let wire: Vec<WireEmission> = serde_json::from_str(&batch)?;
        Ok(wire.into_iter().map(Emission::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> BoaSession {
        BoaSession::new().expect("prelude should install")
    }

    fn compile_and_invoke(source: &str) -> (Compilation, Invocation) {
        let mut session = session();
        let compilation = session.compile(source, true).unwrap();
        let invocation = session.invoke().unwrap();
        (compilation, invocation)
    }

    #[test]
    fn test_expression_form_returns_value() {
        let (compilation, invocation) = compile_and_invoke("42");
        assert_eq!(compilation, Compilation::Ready(CompiledForm::Expression));
        assert_eq!(invocation, Invocation::Returned(Some(ScriptValue::text("42"))));
    }

    #[test]
    fn test_trailing_semicolon_still_an_expression() {
        let (compilation, invocation) = compile_and_invoke("6 * 7;\n");
        assert_eq!(compilation, Compilation::Ready(CompiledForm::Expression));
        assert_eq!(invocation, Invocation::Returned(Some(ScriptValue::text("42"))));
    }

    #[test]
    fn test_statements_fall_back_to_body_form() {
        let mut session = session();
        let compilation = session
            .compile("console.log(1+1); console.log('hi')", true)
            .unwrap();
        assert_eq!(compilation, Compilation::Ready(CompiledForm::Body));
        assert_eq!(session.invoke().unwrap(), Invocation::Returned(None));

        let emissions = session.drain().unwrap();
        let texts: Vec<_> = emissions
            .iter()
            .map(|e| crate::value::render_args(&e.args))
            .collect();
        assert_eq!(texts, vec!["2", "hi"]);
        assert!(emissions.iter().all(|e| e.channel == Channel::Standard));
        assert!(session.drain().unwrap().is_empty());
    }

    #[test]
    fn test_implicit_return_can_be_disabled() {
        let mut session = session();
        assert_eq!(
            session.compile("42", false).unwrap(),
            Compilation::Ready(CompiledForm::Body)
        );
        assert_eq!(session.invoke().unwrap(), Invocation::Returned(None));
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let mut session = session();
        match session.compile("let = ;", true).unwrap() {
            Compilation::Rejected(message) => assert!(message.contains("SyntaxError")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_thrown_error_is_described() {
        let (_, invocation) = compile_and_invoke("throw new Error('nope')");
        match invocation {
            Invocation::Threw(message) => assert!(message.contains("nope")),
            other => panic!("expected a throw, got {:?}", other),
        }
    }

    #[test]
    fn test_thrown_primitive_is_described() {
        let (_, invocation) = compile_and_invoke("throw 'boom'");
        assert_eq!(invocation, Invocation::Threw("boom".to_string()));
    }

    #[test]
    fn test_values_are_encoded() {
        let mut session = session();
        session
            .compile(
                "console.log(null, undefined, 'a', 1.5, true, {x: [1, 2]}); \
                 const o = {}; o.self = o; console.error(o);",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let emissions = session.drain().unwrap();

        assert_eq!(
            emissions[0].args,
            vec![
                ScriptValue::Null,
                ScriptValue::Undefined,
                ScriptValue::text("a"),
                ScriptValue::text("1.5"),
                ScriptValue::text("true"),
                ScriptValue::Structured(json!({ "x": [1, 2] })),
            ]
        );
        assert_eq!(emissions[1].channel, Channel::Error);
        assert!(matches!(emissions[1].args[0], ScriptValue::Unserializable(_)));
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let mut session = session();
        session
            .compile(
                "setTimeout(() => console.log('late'), 20); \
                 setTimeout(() => console.log('early'), 5); \
                 setTimeout(() => console.log('tie'), 5);",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let first = session.next_timer_due().unwrap().unwrap();
        assert!((5..20).contains(&first), "first due at {}", first);

        let mut order = Vec::new();
        while session.fire_next_timer().unwrap() {
            for emission in session.drain().unwrap() {
                order.push(crate::value::render_args(&emission.args));
            }
        }
        assert_eq!(order, vec!["early", "tie", "late"]);
        assert_eq!(session.next_timer_due().unwrap(), None);
    }

    #[test]
    fn test_cleared_timer_never_fires() {
        let mut session = session();
        session
            .compile("const id = setTimeout(() => console.log('x'), 1); clearTimeout(id);", true)
            .unwrap();
        session.invoke().unwrap();
        assert_eq!(session.next_timer_due().unwrap(), None);
        assert!(!session.fire_next_timer().unwrap());
    }

    #[test]
    fn test_nested_timer_is_relative_to_parent() {
        let mut session = session();
        session
            .compile(
                "setTimeout(() => setTimeout(() => console.log('child'), 10), 30);",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let parent = session.next_timer_due().unwrap().unwrap();
        assert!(session.fire_next_timer().unwrap());
        assert_eq!(session.next_timer_due().unwrap(), Some(parent + 10));
    }

    #[test]
    fn test_timer_due_includes_time_spent_running() {
        let mut session = session();
        session
            .compile(
                "const t = Date.now(); while (Date.now() - t < 60) {} \
                 setTimeout(() => console.log('x'), 10);",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let due = session.next_timer_due().unwrap().unwrap();
        assert!(due >= 70, "due at {}", due);
    }

    #[test]
    fn test_oversized_delays_fire_almost_immediately() {
        let mut session = session();
        session
            .compile(
                "setTimeout(() => console.log('inf'), Infinity); \
                 setTimeout(() => console.log('big'), 2 ** 31);",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let due = session.next_timer_due().unwrap().unwrap();
        assert!(due < 20, "due at {}", due);
        assert!(session.fire_next_timer().unwrap());
        assert!(session.fire_next_timer().unwrap());
        let texts: Vec<_> = session
            .drain()
            .unwrap()
            .iter()
            .map(|e| crate::value::render_args(&e.args))
            .collect();
        assert_eq!(texts, vec!["inf", "big"]);
    }

    #[test]
    fn test_source_only_valid_inside_wrapper_is_rejected() {
        let mut session = session();
        assert!(matches!(
            session.compile("1) + (2", true).unwrap(),
            Compilation::Rejected(_)
        ));
        assert!(matches!(
            session.compile("1) + (2", false).unwrap(),
            Compilation::Rejected(_)
        ));
    }

    #[test]
    fn test_lone_surrogates_are_replaced() {
        let mut session = session();
        session
            .compile(
                "console.log('\\uD800x', '\\uDC00', '\u{1F600}'); \
                 console.log({ k: 'a\\uDBFF' });",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        let emissions = session.drain().unwrap();

        assert_eq!(
            emissions[0].args,
            vec![
                ScriptValue::text("\u{FFFD}x"),
                ScriptValue::text("\u{FFFD}"),
                ScriptValue::text("\u{1F600}"),
            ]
        );
        assert_eq!(
            emissions[1].args,
            vec![ScriptValue::Structured(json!({ "k": "a\u{FFFD}" }))]
        );
    }

    #[test]
    fn test_tampered_globals_do_not_break_host_calls() {
        let mut session = session();
        session
            .compile(
                "JSON.stringify = () => 1; String = null; Date.now = () => 0; \
                 Array.prototype.push = null; Array.prototype.map = null; \
                 Function.prototype.apply = null; Function.prototype.call = null; \
                 Object.prototype.toJSON = () => 'hijacked'; \
                 setTimeout(() => console.log('tick'), 1); \
                 console.log('still here'); return 7;",
                true,
            )
            .unwrap();
        assert_eq!(
            session.invoke().unwrap(),
            Invocation::Returned(Some(ScriptValue::text("7")))
        );
        assert_eq!(
            session.drain().unwrap()[0].args,
            vec![ScriptValue::text("still here")]
        );
        assert!(session.fire_next_timer().unwrap());
        assert_eq!(
            session.drain().unwrap()[0].args,
            vec![ScriptValue::text("tick")]
        );
    }

    #[test]
    fn test_throwing_callback_reports_late_error() {
        let mut session = session();
        session
            .compile("setTimeout(() => { throw new Error('later') }, 1);", true)
            .unwrap();
        session.invoke().unwrap();
        session.fire_next_timer().unwrap();
        let emissions = session.drain().unwrap();

        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].origin, Origin::Late);
        assert_eq!(emissions[0].channel, Channel::Error);
        assert_eq!(emissions[0].args, vec![ScriptValue::text("Error: later")]);
    }

    #[test]
    fn test_promise_continuations_run_as_microtasks() {
        let mut session = session();
        session
            .compile(
                "Promise.resolve('resolved').then(v => console.log(v)); \
                 queueMicrotask(() => console.log('queued')); \
                 console.log('sync');",
                true,
            )
            .unwrap();
        session.invoke().unwrap();
        assert_eq!(session.drain().unwrap().len(), 1);

        session.run_microtasks().unwrap();
        let texts: Vec<_> = session
            .drain()
            .unwrap()
            .iter()
            .map(|e| crate::value::render_args(&e.args))
            .collect();
        assert_eq!(texts, vec!["resolved", "queued"]);
    }
}
