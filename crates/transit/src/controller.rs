use futures::future::BoxFuture;
use regionspace_common::AvatarId;
use regionspace_kernel::TransitStatus;

use crate::args::TransitArguments;
use crate::error::TransitError;

/// A handoff in flight. Resolves once the avatar has left or the handoff
/// has been rolled back.
pub type TransitTask = BoxFuture<'static, Result<(), TransitError>>;

pub trait TransitController: TransitStatus + Send + Sync + 'static {
    /// Register `args.avatar` as in transit and return the task that moves
    /// it. Registration happens before this returns; a second call for the
    /// same avatar yields a task that fails with `AlreadyInTransit`.
    fn try_begin_transit(&self, args: TransitArguments) -> TransitTask;

    /// Report whether the object `avatar` is riding reached its destination.
    fn handle_object_send_result(&self, avatar: AvatarId, success: bool);

    /// The destination has taken over `avatar`. Returns false if the avatar
    /// was not in transit.
    fn handle_release_agent(&self, avatar: AvatarId) -> bool;
}
