use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

type Init = Box<dyn FnOnce() -> Value + Send>;

/// A synchronous value computed at most once, on first demand.
pub struct LazyValue {
    cell: OnceLock<Value>,
    init: Mutex<Option<Init>>,
}

impl LazyValue {
    pub(crate) fn new(init: impl FnOnce() -> Value + Send + 'static) -> Self {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(Some(Box::new(init))),
        }
    }

    pub(crate) fn force(&self) -> Value {
        self.cell
            .get_or_init(|| {
                let init = self.init.lock().unwrap_or_else(|e| e.into_inner()).take();
                init.map(|f| f()).unwrap_or(Value::Null)
            })
            .clone()
    }
}

/// One entry of the variable store. Producers collapse into `Value` the first time
/// they are read.
#[derive(Clone)]
pub enum Slot {
    Value(Value),
    Producer(Arc<LazyValue>),
    AsyncProducer(Shared<BoxFuture<'static, Value>>),
}

impl Slot {
    pub fn producer(init: impl FnOnce() -> Value + Send + 'static) -> Self {
        Slot::Producer(Arc::new(LazyValue::new(init)))
    }

    pub fn async_producer(future: impl Future<Output = Value> + Send + 'static) -> Self {
        Slot::AsyncProducer(future.boxed().shared())
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Slot::Value(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Slot::Producer(_) => f.write_str("Producer(..)"),
            Slot::AsyncProducer(_) => f.write_str("AsyncProducer(..)"),
        }
    }
}
