//! Handlers sharing per-context state through a `ContextTable`.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{FatalLog, start};
use shmcall::{BoxError, ContextId, ContextTable, Value};

/// Hooks registered for one caller-side loader.
type Hooks = RefCell<Vec<String>>;

fn context_arg(args: &[Value]) -> Result<ContextId, BoxError> {
    args.first()
        .and_then(ContextId::from_value)
        .ok_or_else(|| "missing context id".into())
}

#[test]
fn contexts_have_an_explicit_lifecycle() {
    let fatal = FatalLog::default();
    let (pending, worker) = start(&fatal, |handlers| {
        let table: Rc<ContextTable<Hooks>> = Rc::new(ContextTable::new("loaders"));

        let open = table.clone();
        let add = table.clone();
        let list = table.clone();
        let close = table;
        handlers
            .register("open", move |_args: Vec<Value>| {
                let table = open.clone();
                async move {
                    let id = ContextId::next();
                    table.insert(id, RefCell::default())?;
                    Ok(Value::from(id))
                }
            })?
            .register("add_hook", move |args: Vec<Value>| {
                let table = add.clone();
                async move {
                    let id = context_arg(&args)?;
                    let hooks = table.get(id).ok_or_else(|| format!("{id} is not open"))?;
                    let name = args.get(1).and_then(Value::as_str).unwrap_or_default();
                    hooks.borrow_mut().push(name.to_owned());
                    let count = hooks.borrow().len() as i64;
                    Ok(Value::from(count))
                }
            })?
            .register("hooks", move |args: Vec<Value>| {
                let table = list.clone();
                async move {
                    let id = context_arg(&args)?;
                    let Some(hooks) = table.get(id) else {
                        return Ok(Value::Null);
                    };
                    let names = hooks.borrow().iter().map(|h| Value::from(h.as_str())).collect();
                    Ok(Value::List(names))
                }
            })?
            .register("close", move |args: Vec<Value>| {
                let table = close.clone();
                async move {
                    let id = context_arg(&args)?;
                    Ok(Value::from(table.remove(id).is_some()))
                }
            })?;
        Ok(())
    });

    let mut caller = pending.wait_ready().unwrap();
    let first = caller.call("open", vec![]).unwrap();
    let second = caller.call("open", vec![]).unwrap();
    assert_ne!(first, second);

    let mut add_hook =
        |id: &Value, name: &str| caller.call("add_hook", vec![id.clone(), name.into()]);
    assert_eq!(add_hook(&first, "resolve").unwrap(), Value::Int(1));
    assert_eq!(add_hook(&first, "load").unwrap(), Value::Int(2));
    assert_eq!(add_hook(&second, "load").unwrap(), Value::Int(1));

    assert_eq!(
        caller.call("hooks", vec![first.clone()]).unwrap(),
        Value::List(vec!["resolve".into(), "load".into()])
    );
    assert_eq!(caller.call("close", vec![first.clone()]).unwrap(), Value::Bool(true));
    assert_eq!(caller.call("close", vec![first.clone()]).unwrap(), Value::Bool(false));
    assert_eq!(caller.call("hooks", vec![first]).unwrap(), Value::Null);
    assert_eq!(caller.call("close", vec![second]).unwrap(), Value::Bool(true));

    caller.shutdown().unwrap();
    assert_eq!(worker.join().unwrap().handled, 10);
    assert!(fatal.errors().is_empty());
}
