// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Coordinator: spawns a set of workers, cancels any subset and collects
// every outcome. Shared state handed to workers must outlive all of them,
// so teardown only happens once each worker has terminated.

use crate::cancel::Canceller;
use crate::worker::{Builder, Context, Joined, Payload, WorkerHandle, WorkerId};
use crate::{Result, SyncError};

/// Owner of a group of workers sharing one routine result type.
pub struct Coordinator<R, T = ()> {
    name: String,
    template: Builder,
    workers: Vec<WorkerHandle<R, T>>,
    canceller: Canceller,
}

impl<R, T> Coordinator<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: Builder::new(),
            workers: Vec::new(),
            canceller: Canceller::new(),
        }
    }

    /// Attributes applied to every worker spawned from now on. A template
    /// without a name yields workers named `{coordinator}-{index}`.
    pub fn with_template(mut self, template: Builder) -> Self {
        self.template = template;
        self
    }

    /// Register workers with an existing broadcast handle, such as one an
    /// interrupt handler already holds. `cancel_all` then reaches every
    /// worker registered on it.
    pub fn with_canceller(mut self, canceller: Canceller) -> Self {
        for w in &self.workers {
            canceller.register(w.token());
        }
        self.canceller = canceller;
        self
    }

    pub fn builder(&self) -> &Builder {
        &self.template
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start another worker. Detached templates are refused since every
    /// worker must be joined before teardown.
    pub fn spawn<F>(&mut self, payload: Payload<T>, routine: F) -> Result<WorkerId>
    where
        F: FnOnce(&Context, &mut T) -> Result<R> + Send + 'static,
    {
        let mut builder = self.template.clone();
        if builder.is_detached() {
            return Err(SyncError::invalid("coordinator workers must be joinable"));
        }
        if builder.worker_name().is_none() {
            builder = builder.name(format!("{}-{}", self.name, self.workers.len()));
        }
        let handle = builder.spawn(payload, routine)?;
        let id = handle.id();
        self.canceller.register(handle.token());
        self.workers.push(handle);
        Ok(id)
    }

    /// Request cancellation of one worker. Returns `false` if the id is
    /// unknown or the worker already terminated.
    pub fn cancel(&self, id: WorkerId) -> bool {
        self.workers
            .iter()
            .find(|w| w.id() == id)
            .is_some_and(|w| w.request_cancel())
    }

    /// Request cancellation of every worker of this coordinator. Returns how
    /// many had not terminated yet.
    pub fn cancel_all(&self) -> usize {
        self.workers.iter().filter(|w| w.request_cancel()).count()
    }

    /// Broadcast handle for an interrupt handler.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id()).collect()
    }

    pub fn handle(&self, id: WorkerId) -> Option<&WorkerHandle<R, T>> {
        self.workers.iter().find(|w| w.id() == id)
    }

    /// Workers spawned and not yet joined.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Join every worker in spawn order.
    ///
    /// All workers are joined even if one join fails; the first failure is
    /// reported after the rest have terminated.
    pub fn join_all(&mut self) -> Result<Vec<(WorkerId, Joined<R, T>)>> {
        let mut out = Vec::with_capacity(self.workers.len());
        let mut first_err = None;
        for mut w in self.workers.drain(..) {
            match w.join() {
                Ok(j) => out.push((w.id(), j)),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

impl<R, T> Drop for Coordinator<R, T> {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::warn!(
            coordinator = %self.name,
            live = self.workers.len(),
            "coordinator dropped with unjoined workers; cancelling and joining"
        );
        for w in &self.workers {
            w.request_cancel();
        }
        for mut w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}
