//! 실시간 스트림 처리.
//!
//! - `topic`: 토픽 이름
//! - `frame`: 원시 프레임 분류
//! - `registry`: 토픽별 구독자 레지스트리
//! - `dispatcher`: 구독자별 메일박스 분배
//! - `multiplexer`: 업스트림 연결 수명 관리
//! - `sink`: 외부 소비자용 이벤트 싱크

pub mod dispatcher;
pub mod frame;
pub mod multiplexer;
pub mod registry;
pub mod sink;
pub mod topic;

pub use dispatcher::{subscriber_fn, DispatchOutcome, Dispatcher, Subscriber, SubscriberError};
pub use frame::{classify_frame, MiniTicker, StreamEvent, CONTROL_ACK};
pub use multiplexer::{FeedStatus, StreamMultiplexer};
pub use registry::{SubscriberId, TopicRegistry};
pub use sink::{BroadcastSink, EventSink, OutboundEvent, SinkSubscriber};
pub use topic::Topic;
