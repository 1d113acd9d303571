use std::future::Future;

/// Receiver of failure summaries produced by sync runs.
///
/// Delivery is fire-and-forget: implementations log their own failures and never report them
/// back, so a broken sink cannot fail a run.
pub trait AlertSink {
    fn notify(&self, message: String) -> impl Future<Output = ()> + Send;
}
