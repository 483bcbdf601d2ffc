use crate::error::{CfdpError, Result};

/// Maximum size of a PDU's data field the codec will build in one PDU
/// (compile-time buffer budget referenced by §6's `outgoing_file_chunk_size`
/// validation).
pub const MAX_PDU_DATA_SIZE: usize = 4096;

/// A directory-polling rule (§3 "PollDir config").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollDirConfig {
    interval_sec: u32,
    priority: u8,
    class: u8,
    dest_eid: u64,
    src_dir: String,
    dst_dir: String,
    enabled: bool,
}

impl PollDirConfig {
    pub fn new(src_dir: impl Into<String>, dst_dir: impl Into<String>, dest_eid: u64) -> Self {
        PollDirConfig {
            interval_sec: 5,
            priority: 0,
            class: 2,
            dest_eid,
            src_dir: src_dir.into(),
            dst_dir: dst_dir.into(),
            enabled: true,
        }
    }

    pub fn with_interval_sec(mut self, value: u32) -> Self {
        self.interval_sec = value;
        self
    }

    pub fn with_priority(mut self, value: u8) -> Self {
        self.priority = value;
        self
    }

    pub fn with_class(mut self, value: u8) -> Self {
        self.class = value;
        self
    }

    pub fn with_enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    pub fn interval_sec(&self) -> u32 {
        self.interval_sec
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn class(&self) -> u8 {
        self.class
    }

    pub fn dest_eid(&self) -> u64 {
        self.dest_eid
    }

    pub fn src_dir(&self) -> &str {
        &self.src_dir
    }

    pub fn dst_dir(&self) -> &str {
        &self.dst_dir
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Per-channel configuration (§3 "Channel config").
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    max_outgoing_messages_per_wakeup: usize,
    rx_max_messages_per_wakeup: usize,
    ack_timer_s: u64,
    nak_timer_s: u64,
    inactivity_timer_s: u64,
    ack_limit: u32,
    nak_limit: u32,
    input_mid: u32,
    output_mid: u32,
    input_pipe_depth: usize,
    polldirs: Vec<PollDirConfig>,
    throttle_sem_name: String,
    dequeue_enabled: bool,
    move_dir: String,
}

impl ChannelConfig {
    pub fn new(input_mid: u32, output_mid: u32) -> Self {
        ChannelConfig {
            max_outgoing_messages_per_wakeup: 4,
            rx_max_messages_per_wakeup: 4,
            ack_timer_s: 2,
            nak_timer_s: 2,
            inactivity_timer_s: 30,
            ack_limit: 4,
            nak_limit: 4,
            input_mid,
            output_mid,
            input_pipe_depth: 16,
            polldirs: Vec::new(),
            throttle_sem_name: String::new(),
            dequeue_enabled: true,
            move_dir: String::new(),
        }
    }

    pub fn with_max_outgoing_messages_per_wakeup(mut self, value: usize) -> Self {
        self.max_outgoing_messages_per_wakeup = value;
        self
    }

    pub fn with_rx_max_messages_per_wakeup(mut self, value: usize) -> Self {
        self.rx_max_messages_per_wakeup = value;
        self
    }

    pub fn with_ack_timer_s(mut self, value: u64) -> Self {
        self.ack_timer_s = value;
        self
    }

    pub fn with_nak_timer_s(mut self, value: u64) -> Self {
        self.nak_timer_s = value;
        self
    }

    pub fn with_inactivity_timer_s(mut self, value: u64) -> Self {
        self.inactivity_timer_s = value;
        self
    }

    pub fn with_ack_limit(mut self, value: u32) -> Self {
        self.ack_limit = value;
        self
    }

    pub fn with_nak_limit(mut self, value: u32) -> Self {
        self.nak_limit = value;
        self
    }

    pub fn with_polldir(mut self, dir: PollDirConfig) -> Self {
        self.polldirs.push(dir);
        self
    }

    pub fn with_throttle_sem_name(mut self, value: impl Into<String>) -> Self {
        self.throttle_sem_name = value.into();
        self
    }

    pub fn with_dequeue_enabled(mut self, value: bool) -> Self {
        self.dequeue_enabled = value;
        self
    }

    pub fn with_move_dir(mut self, value: impl Into<String>) -> Self {
        self.move_dir = value.into();
        self
    }

    /// Runtime setters, distinct from the `with_*` builder methods above:
    /// these back the `SetParam` command surface (§6), which reconfigures a
    /// live channel rather than one still under construction.
    pub fn set_ack_timer_s(&mut self, value: u64) {
        self.ack_timer_s = value;
    }

    pub fn set_nak_timer_s(&mut self, value: u64) {
        self.nak_timer_s = value;
    }

    pub fn set_inactivity_timer_s(&mut self, value: u64) {
        self.inactivity_timer_s = value;
    }

    pub fn set_ack_limit(&mut self, value: u32) {
        self.ack_limit = value;
    }

    pub fn set_nak_limit(&mut self, value: u32) {
        self.nak_limit = value;
    }

    pub fn max_outgoing_messages_per_wakeup(&self) -> usize {
        self.max_outgoing_messages_per_wakeup
    }

    pub fn rx_max_messages_per_wakeup(&self) -> usize {
        self.rx_max_messages_per_wakeup
    }

    pub fn ack_timer_s(&self) -> u64 {
        self.ack_timer_s
    }

    pub fn nak_timer_s(&self) -> u64 {
        self.nak_timer_s
    }

    pub fn inactivity_timer_s(&self) -> u64 {
        self.inactivity_timer_s
    }

    pub fn ack_limit(&self) -> u32 {
        self.ack_limit
    }

    pub fn nak_limit(&self) -> u32 {
        self.nak_limit
    }

    pub fn input_mid(&self) -> u32 {
        self.input_mid
    }

    pub fn output_mid(&self) -> u32 {
        self.output_mid
    }

    pub fn input_pipe_depth(&self) -> usize {
        self.input_pipe_depth
    }

    pub fn polldirs(&self) -> &[PollDirConfig] {
        &self.polldirs
    }

    pub fn throttle_sem_name(&self) -> &str {
        &self.throttle_sem_name
    }

    pub fn dequeue_enabled(&self) -> bool {
        self.dequeue_enabled
    }

    pub fn move_dir(&self) -> &str {
        &self.move_dir
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.ack_limit == 0 {
            return Err(CfdpError::InvalidConfig("ack_limit must be non-zero"));
        }
        if self.nak_limit == 0 {
            return Err(CfdpError::InvalidConfig("nak_limit must be non-zero"));
        }
        Ok(())
    }
}

/// Top-level engine configuration (§3 "Top config").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    ticks_per_second: u64,
    rx_crc_calc_bytes_per_wakeup: u32,
    local_eid: u64,
    channels: Vec<ChannelConfig>,
    outgoing_file_chunk_size: usize,
    tmp_dir: String,
    pool_capacity: usize,
    history_capacity: usize,
}

impl EngineConfig {
    pub fn new(local_eid: u64) -> Self {
        EngineConfig {
            ticks_per_second: 1,
            rx_crc_calc_bytes_per_wakeup: 4096,
            local_eid,
            channels: Vec::new(),
            outgoing_file_chunk_size: 1024,
            tmp_dir: "/tmp".to_string(),
            pool_capacity: 64,
            history_capacity: 32,
        }
    }

    pub fn with_ticks_per_second(mut self, value: u64) -> Self {
        self.ticks_per_second = value;
        self
    }

    pub fn with_rx_crc_calc_bytes_per_wakeup(mut self, value: u32) -> Self {
        self.rx_crc_calc_bytes_per_wakeup = value;
        self
    }

    pub fn with_outgoing_file_chunk_size(mut self, value: usize) -> Self {
        self.outgoing_file_chunk_size = value;
        self
    }

    pub fn with_tmp_dir(mut self, value: impl Into<String>) -> Self {
        self.tmp_dir = value.into();
        self
    }

    pub fn with_pool_capacity(mut self, value: usize) -> Self {
        self.pool_capacity = value;
        self
    }

    pub fn with_history_capacity(mut self, value: usize) -> Self {
        self.history_capacity = value;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    pub fn rx_crc_calc_bytes_per_wakeup(&self) -> u32 {
        self.rx_crc_calc_bytes_per_wakeup
    }

    pub fn local_eid(&self) -> u64 {
        self.local_eid
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn outgoing_file_chunk_size(&self) -> usize {
        self.outgoing_file_chunk_size
    }

    pub fn tmp_dir(&self) -> &str {
        &self.tmp_dir
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Validate construction-time invariants (§6, §10.3). Called by
    /// `Engine::new`; never deferred to first use.
    pub fn validate(&self) -> Result<()> {
        if self.ticks_per_second == 0 {
            return Err(CfdpError::InvalidConfig("ticks_per_second must be non-zero"));
        }
        if self.rx_crc_calc_bytes_per_wakeup == 0 || self.rx_crc_calc_bytes_per_wakeup % 1024 != 0
        {
            return Err(CfdpError::InvalidConfig(
                "rx_crc_calc_bytes_per_wakeup must be a positive multiple of 1024",
            ));
        }
        if self.outgoing_file_chunk_size == 0
            || self.outgoing_file_chunk_size > MAX_PDU_DATA_SIZE
        {
            return Err(CfdpError::InvalidConfig(
                "outgoing_file_chunk_size must be in 1..=MAX_PDU_DATA_SIZE",
            ));
        }
        if self.channels.is_empty() {
            return Err(CfdpError::InvalidConfig("at least one channel is required"));
        }
        for channel in &self.channels {
            channel.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        EngineConfig::new(1).with_channel(ChannelConfig::new(1, 2))
    }

    #[test]
    fn default_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_multiple_of_1024_crc_budget() {
        let cfg = valid_config().with_rx_crc_calc_bytes_per_wakeup(1000);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_ticks_per_second() {
        let cfg = valid_config().with_ticks_per_second(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_oversized_chunk() {
        let cfg = valid_config().with_outgoing_file_chunk_size(MAX_PDU_DATA_SIZE + 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_ack_or_nak_limit() {
        let cfg = EngineConfig::new(1).with_channel(ChannelConfig::new(1, 2).with_ack_limit(0));
        assert!(cfg.validate().is_err());
    }
}
