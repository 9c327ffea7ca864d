//! 시장 데이터 도메인 모델.

mod candle;
mod sentiment;
mod series;

pub use candle::*;
pub use sentiment::*;
pub use series::*;
