//! Adapting typed async functions into uniform dispatch entries.
//!
//! Any `Fn(CallContext, A1, ..., An) -> impl Future<Output = Result<R, E>>`
//! with up to eight deserializable arguments is a [`Handler`]. The adapter
//! checks the number of positional parameters, decodes each one, runs the
//! function behind a panic boundary and turns its outcome into a response.
//!
//! ```ignore
//! table.add("AddAsync", |_cx: CallContext, a: i64, b: i64| async move {
//!     Ok::<_, anyhow::Error>(a + b)
//! })?;
//! ```

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{error, warn};

use super::cancel::{CallContext, is_cancellation};
use super::codec::{DecodeScope, Params, with_scope};
use super::protocol::{Response, RpcError, UNKNOWN_ERROR};

/// What a handler future resolves to before it is turned into a response.
pub type HandlerOutput = Result<Value, anyhow::Error>;

/// A typed async function usable as an RPC method.
///
/// `Args` is the tuple of decoded argument types; it only exists to keep the
/// per-arity implementations apart.
pub trait Handler<Args>: Clone + Send + Sync + 'static {
    /// Number of positional parameters the method takes.
    const ARITY: usize;

    /// Decode `params` and start the call. Decoding errors are returned
    /// before the function runs.
    fn call(
        &self,
        cx: CallContext,
        params: Params,
    ) -> Result<BoxFuture<'static, HandlerOutput>, RpcError>;
}

/// Object-safe form of a [`Handler`], as stored in a method table.
pub trait ErasedHandler: Send + Sync {
    fn arity(&self) -> usize;

    fn start(
        &self,
        cx: CallContext,
        params: Vec<Value>,
    ) -> Result<BoxFuture<'static, HandlerOutput>, RpcError>;
}

pub(crate) struct Erased<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> Erased<H, Args> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

impl<H, Args> ErasedHandler for Erased<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn arity(&self) -> usize {
        H::ARITY
    }

    fn start(
        &self,
        cx: CallContext,
        params: Vec<Value>,
    ) -> Result<BoxFuture<'static, HandlerOutput>, RpcError> {
        let params = Params::exact(params, H::ARITY)?;
        self.handler.call(cx, params)
    }
}

async fn finish<R, E, Fut>(fut: Fut) -> HandlerOutput
where
    Fut: Future<Output = Result<R, E>>,
    R: Serialize,
    E: Into<anyhow::Error>,
{
    let value = fut.await.map_err(Into::into)?;
    // The handler succeeded; failing to encode its value is an engine fault.
    serde_json::to_value(value).map_err(|e| {
        RpcError::internal_error(format!("failed to encode result: {e}")).into()
    })
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, Fut, R, E, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn(CallContext, $($arg,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + Send + 'static,
            E: Into<anyhow::Error> + Send + 'static,
            $($arg: DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = <[&str]>::len(&[$(stringify!($arg)),*]);

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(
                &self,
                cx: CallContext,
                mut params: Params,
            ) -> Result<BoxFuture<'static, HandlerOutput>, RpcError> {
                $(let $arg = params.next::<$arg>()?;)*
                let f = self.clone();
                Ok(Box::pin(async move { finish(f(cx, $($arg,)*)).await }))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Run one call to completion and build its response.
///
/// Arguments are decoded inside `scope`; a panic anywhere in the handler
/// becomes an internal error instead of unwinding into the connection.
pub async fn invoke(
    handler: &dyn ErasedHandler,
    cx: CallContext,
    params: Vec<Value>,
    scope: &DecodeScope,
) -> Response {
    let id = cx.id().clone();
    let token = cx.token();
    let method = cx.method().to_string();

    let started = AssertUnwindSafe(|| with_scope(scope, || handler.start(cx, params)));
    let fut = match std::panic::catch_unwind(started) {
        Ok(Ok(fut)) => fut,
        Ok(Err(err)) => {
            warn!(code = err.code, error = %err.message, "Rejected call arguments");
            return Response::error(id, err);
        }
        Err(panic) => return Response::error(id, panicked(&method, panic)),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Response::success(id, value),
        Ok(Err(err)) if is_cancellation(&err, &token) => Response::error(id, RpcError::cancelled()),
        Ok(Err(err)) => Response::error(id, domain_error(err)),
        Err(panic) => Response::error(id, panicked(&method, panic)),
    }
}

/// An `RpcError` anywhere in the chain keeps its code; anything else is reported as unknown.
fn domain_error(err: anyhow::Error) -> RpcError {
    if let Some(rpc) = err.chain().find_map(|cause| cause.downcast_ref::<RpcError>()) {
        return rpc.clone();
    }
    RpcError::new(UNKNOWN_ERROR, format!("{err:#}"))
}

fn panicked(method: &str, panic: Box<dyn Any + Send>) -> RpcError {
    let message = panic_message(panic.as_ref());
    error!(method, panic = %message, "Handler panicked");
    RpcError::internal_error(format!("handler panicked: {message}"))
        .with_data(json!({ "method": method, "panic": message }))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
