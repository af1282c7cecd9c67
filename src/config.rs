/// Everything the bridge needs to come up. Passed once at construction;
/// nothing is reconfigurable mid-session.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Serial device path.
    pub device: String,
    /// Baud rate; MIDI hardware runs at 31250 but USB adapters often use
    /// arbitrary higher rates.
    pub baud: u32,
    /// Name the JACK client registers under.
    pub client_name: String,
    /// Companion port to connect our MIDI input to when it exists.
    pub auto_connect: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud: 31250,
            client_name: "midibridge".to_string(),
            auto_connect: None,
        }
    }
}
