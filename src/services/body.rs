//! # Service bodies and the context they run in.
//!
//! A [`ServiceBody`] is the long-running work behind one service type. The supervisor
//! treats it as an opaque call: it hands over a [`ServiceContext`] and waits for the
//! returned future. Returning (with or without an error) ends the run; the
//! supervisor then schedules a restart.
//!
//! [`ServiceFn`] wraps a closure producing a fresh future per run, so no state
//! leaks between restarts unless the closure captures an `Arc` on purpose.
//!
//! ## Status reporting
//! The supervisor marks a record `Pending` before the body starts. The body reports
//! its own progress through [`ServiceContext::initializing`] and
//! [`ServiceContext::active`]; node-link bodies also report sub-stream statuses.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::registry::StatusRegistry;
use super::types::{NodeId, ServiceStatus, ServiceType, SubscriptionStream};
use crate::collaborators::ConnectionRef;
use crate::error::ServiceError;

/// Boxed future returned by a service body.
pub type BoxServiceFuture = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'static>>;

/// Shared handle to a service body.
pub type ServiceBodyRef = Arc<dyn ServiceBody>;

/// # Long-running, cancellable service implementation.
///
/// Implementations should watch [`ServiceContext::cancelled`] and return promptly
/// once it fires.
///
/// # Example
/// ```
/// use nodevisor::{ServiceBody, ServiceContext, ServiceError, BoxServiceFuture};
///
/// struct Idle;
///
/// impl ServiceBody for Idle {
///     fn name(&self) -> &str { "idle" }
///
///     fn run(&self, ctx: ServiceContext) -> BoxServiceFuture {
///         Box::pin(async move {
///             ctx.active();
///             ctx.cancelled().await;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait ServiceBody: Send + Sync + 'static {
    /// Returns a stable, human-readable body name.
    fn name(&self) -> &str;

    /// Creates the future for one run of the service.
    fn run(&self, ctx: ServiceContext) -> BoxServiceFuture;
}

/// Everything a body needs for one run.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    service: ServiceType,
    node_id: NodeId,
    token: CancellationToken,
    connection: Option<ConnectionRef>,
    registry: Arc<StatusRegistry>,
}

impl ServiceContext {
    pub(crate) fn new(
        service: ServiceType,
        node_id: NodeId,
        token: CancellationToken,
        connection: Option<ConnectionRef>,
        registry: Arc<StatusRegistry>,
    ) -> Self {
        Self {
            service,
            node_id,
            token,
            connection,
            registry,
        }
    }

    #[inline]
    pub fn service(&self) -> ServiceType {
        self.service
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Connection established by the supervisor, for connection-requiring services.
    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.as_ref()
    }

    /// Token cancelled on targeted stop or global shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Reports `Initializing` for this record.
    pub fn initializing(&self) -> bool {
        self.registry
            .set_status(self.service, self.node_id, ServiceStatus::Initializing)
    }

    /// Reports `Active` for this record.
    pub fn active(&self) -> bool {
        self.registry
            .set_status(self.service, self.node_id, ServiceStatus::Active)
    }

    /// Reports the status of one node-link sub-stream for this node.
    pub fn set_stream_status(&self, stream: SubscriptionStream, status: ServiceStatus) {
        self.registry.set_stream_status(self.node_id, stream, status);
    }
}

/// Closure-backed service body.
pub struct ServiceFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ServiceFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the body and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use nodevisor::{ServiceFn, ServiceBodyRef, ServiceContext, ServiceError};
    ///
    /// let body: ServiceBodyRef = ServiceFn::arc("noop", |_ctx: ServiceContext| async {
    ///     Ok::<_, ServiceError>(())
    /// });
    /// assert_eq!(body.name(), "noop");
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> ServiceBody for ServiceFn<F>
where
    F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: ServiceContext) -> BoxServiceFuture {
        Box::pin((self.f)(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_reports_into_registry() {
        let registry = StatusRegistry::new();
        let ctx = ServiceContext::new(
            ServiceType::NodeLinkService,
            5,
            CancellationToken::new(),
            None,
            Arc::clone(&registry),
        );
        registry.set_status(ServiceType::NodeLinkService, 5, ServiceStatus::Pending);

        let body: ServiceBodyRef = ServiceFn::arc("link", |ctx: ServiceContext| async move {
            ctx.initializing();
            ctx.set_stream_status(SubscriptionStream::ForwardStream, ServiceStatus::Active);
            ctx.active();
            Ok(())
        });
        body.run(ctx).await.unwrap();

        assert_eq!(
            registry.status(ServiceType::NodeLinkService, 5),
            ServiceStatus::Active
        );
        assert_eq!(
            registry.stream_status(5, SubscriptionStream::ForwardStream),
            ServiceStatus::Active
        );
    }
}
