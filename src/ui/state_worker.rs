use std::sync::{Arc, Mutex};

use futures::{Future, Stream, StreamExt};
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// Bridges background work onto the UI action queue. Actions sent here land
/// in the application's channel in order, with a repaint requested so the
/// frame that handles them renders promptly.
pub(crate) struct StateWorker<A> {
    handle: Handle,
    sender: Arc<dyn Fn(A) + Send + Sync>,
    token: CancellationToken,
    egui_ctx: Arc<Mutex<Option<eframe::egui::Context>>>,
}

impl<A> Clone for StateWorker<A> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            sender: self.sender.clone(),
            token: self.token.clone(),
            egui_ctx: self.egui_ctx.clone(),
        }
    }
}

impl<A: Send + 'static> StateWorker<A> {
    pub(crate) fn new(
        handle: Handle,
        tx: mpsc::UnboundedSender<A>,
        token: CancellationToken,
    ) -> Self {
        Self {
            handle,
            sender: Arc::new(move |action| {
                if tx.send(action).is_err() {
                    tracing::error!("action receiver closed, dropping action");
                }
            }),
            token,
            egui_ctx: Arc::default(),
        }
    }

    pub(crate) fn set_egui_ctx(&self, ctx: eframe::egui::Context) {
        *self.egui_ctx.lock().unwrap() = Some(ctx);
    }

    /// Send an action onto the UI queue.
    pub(crate) fn send(&self, action: A) {
        (self.sender)(action);
        self.repaint();
    }

    /// Run a future on the runtime and send its resulting action.
    pub(crate) fn perform<F>(&self, fut: F)
    where
        F: Future<Output = A> + Send + 'static,
    {
        let worker = self.clone();
        let token = self.token.clone();

        self.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => (),
                action = fut => worker.send(action),
            }
        });
    }

    /// Run a future that yields a stream and send every item as an action.
    pub(crate) fn stream<F, S>(&self, fut: F)
    where
        F: Future<Output = S> + Send + 'static,
        S: Stream<Item = A> + Send + Unpin + 'static,
    {
        let worker = self.clone();
        let token = self.token.clone();

        self.handle.spawn(async move {
            let mut stream = fut.await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(action) => worker.send(action),
                        None => break,
                    },
                }
            }
        });
    }

    /// Derive a worker whose actions are wrapped into the parent action
    /// type.
    pub(crate) fn scoped<C, W>(&self, wrap: W) -> StateWorker<C>
    where
        C: Send + 'static,
        W: Fn(C) -> A + Send + Sync + 'static,
    {
        let sender = self.sender.clone();

        StateWorker {
            handle: self.handle.clone(),
            sender: Arc::new(move |child| sender(wrap(child))),
            token: self.token.clone(),
            egui_ctx: self.egui_ctx.clone(),
        }
    }

    /// Log and reduce an action against a piece of state.
    pub(crate) fn apply<S>(&self, state: &mut S, action: A, reducer: impl FnOnce(&mut S, A))
    where
        A: std::fmt::Debug,
    {
        tracing::debug!(?action, "got action");
        reducer(state, action);
    }

    fn repaint(&self) {
        if let Some(ctx) = self.egui_ctx.lock().unwrap().as_ref() {
            ctx.request_repaint();
        }
    }
}
