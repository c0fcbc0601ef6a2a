/// Log tags identify the subsystem a message comes from
///
/// The debug key of a tag is what `--debug-<key>` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Hub,
    Bridge,
    Sessions,
    Telemetry,
    Jobs,
    Storage,
    Commands,
    Websocket,
}

impl LogTag {
    pub const ALL: [LogTag; 10] = [
        LogTag::System,
        LogTag::Config,
        LogTag::Hub,
        LogTag::Bridge,
        LogTag::Sessions,
        LogTag::Telemetry,
        LogTag::Jobs,
        LogTag::Storage,
        LogTag::Commands,
        LogTag::Websocket,
    ];

    /// Key used in --debug-<key> / --verbose-<key> flags
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Hub => "hub",
            LogTag::Bridge => "bridge",
            LogTag::Sessions => "sessions",
            LogTag::Telemetry => "telemetry",
            LogTag::Jobs => "jobs",
            LogTag::Storage => "storage",
            LogTag::Commands => "commands",
            LogTag::Websocket => "websocket",
        }
        .to_string()
    }

    pub fn from_debug_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.to_debug_key() == key)
    }

    /// Uppercase label without colors, used in the log file
    pub fn to_plain_string(&self) -> String {
        self.to_debug_key().to_uppercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_key_roundtrip_for_every_tag() {
        for tag in LogTag::ALL {
            assert_eq!(LogTag::from_debug_key(&tag.to_debug_key()), Some(tag));
        }
        assert_eq!(LogTag::from_debug_key("pool"), None);
    }
}
