mod channel;
mod curve;

pub use channel::MeteringChannel;
pub use curve::CurveRecord;
