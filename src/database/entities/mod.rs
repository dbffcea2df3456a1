pub mod friend;
pub mod group;
pub mod offline_message;
pub mod user;

pub use friend::{FriendRepo, MySqlFriendRepo};
pub use group::{Group, GroupMember, GroupRepo, GroupWithMembers, MySqlGroupRepo, ROLE_CREATOR, ROLE_NORMAL};
pub use offline_message::{MySqlOfflineRepo, OfflineRepo};
pub use user::{MySqlUserRepo, User, UserRepo};
