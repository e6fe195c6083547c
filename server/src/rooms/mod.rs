pub mod api;
pub mod directory;
pub mod handlers;
pub mod membership;

pub use directory::{RoomDirectory, RoomSummary};
pub use membership::{Member, MembershipTable};
