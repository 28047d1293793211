// Well-known method and event names. Broker, daemon and client must agree.

// client / daemon → broker
pub const PING: &str = "ping";
pub const EXECUTOR_REGISTER: &str = "executor.register";
pub const COMMAND_QUEUE: &str = "command.queue";

// broker → executor (discovery probes also send executor.hello)
pub const EXECUTOR_HELLO: &str = "executor.hello";
pub const COMMAND_EXECUTE: &str = "command.execute";

// broker → executor, unsolicited
pub const EVENT_EXECUTOR_EVICTED: &str = "executor.evicted";
