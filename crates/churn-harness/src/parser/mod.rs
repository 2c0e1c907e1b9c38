pub mod envelope;
pub mod statsd;
