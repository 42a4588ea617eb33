// 领域与传输模型
// 服务端、客户端与核心会话共用同一套结构

mod change;
mod location;
mod message;

pub use change::{ChangeEvent, ChangeKind, FeedFilter};
pub use location::{Coordinate, InvalidCoordinate, PeerLocation, PeerProfile};
pub use message::DirectMessage;
