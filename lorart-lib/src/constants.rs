// AT protocol tokens exchanged with the radio module firmware

/// Attention probe, first command after opening the link.
pub const CMD_ATTENTION: &str = "AT";

/// Disables command echo.
pub const CMD_ECHO_OFF: &str = "ATE0";

/// Starts the network join handshake.
pub const CMD_JOIN: &str = "AT+JOIN";

/// Prefix of a binary uplink; the hex payload follows the `=`.
pub const CMD_SEND_BINARY: &str = "AT+SENDB=";

/// Selects LoRaWAN OTAA activation.
pub const CMD_MODE_OTAA: &str = "AT+MODE=LWOTAA";

pub const CMD_DEV_EUI: &str = "AT+DEUI=";
pub const CMD_APP_EUI: &str = "AT+APPEUI=";
pub const CMD_APP_KEY: &str = "AT+APPKEY=";

/// Queries the network join status; the module answers `1` (joined) or `0`.
pub const CMD_JOIN_STATUS: &str = "AT+NJS=?";

pub const RESP_STATUS_JOINED: &str = "1";
pub const RESP_STATUS_NOT_JOINED: &str = "0";

/// Line terminator appended to every command.
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// Substring of a join success URC (`+JOIN: JOINED`, `JOINED`, ...).
pub const RESP_JOINED: &str = "JOINED";

/// A bare `OK` line during join polling also counts as success.
pub const RESP_OK: &str = "OK";

/// Any line containing this substring fails the join.
pub const RESP_ERROR: &str = "ERROR";

/// Marker of a binary downlink URC; the hex payload follows.
pub const URC_RECEIVE_BINARY: &str = "+RECVB=";

/// Tag byte leading every uplink frame.
pub const UPLINK_TAG: u8 = 0x01;

/// Size of the uplink frame (tag, code, etag).
pub const UPLINK_FRAME_SIZE: usize = 3;

/// Size of the bulk IN request buffer (one high-speed bulk packet)
pub const READ_CHUNK_SIZE: usize = 512;

/// Length in bytes of a LoRaWAN EUI (DevEUI / AppEUI)
pub const EUI_SIZE: usize = 8;

/// Length in bytes of a LoRaWAN AppKey
pub const APP_KEY_SIZE: usize = 16;
