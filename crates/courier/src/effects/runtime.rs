use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::{Handle, Runtime};

use crate::error::{Error, Result};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Handle of the runtime transfers run on.
///
/// Inside a tokio runtime that runtime is used. Elsewhere a shared
/// multi-thread runtime is started on first use.
pub fn handle() -> Result<Handle> {
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle);
    }
    dedicated_handle()
}

/// Handle of the crate's own multi-thread runtime, started on first use.
///
/// It lives for the rest of the process, unlike whatever runtime happens to
/// be current.
pub fn dedicated_handle() -> Result<Handle> {
    let runtime = RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("courier-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(Arc::new(e)))
    })?;
    Ok(runtime.handle().clone())
}
