pub const ACCEPT: &str = "Accept";
pub const ACCEPT_RANGES: &str = "Accept-Ranges";
pub const AUTHORIZATION: &str = "Authorization";
pub const CONNECTION: &str = "Connection";
pub const CONTENT_BASE: &str = "Content-Base";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const C_SEQ: &str = "CSeq";
pub const DATE: &str = "Date";
pub const EXPIRES: &str = "Expires";
pub const LOCATION: &str = "Location";
pub const PUBLIC: &str = "Public";
pub const RANGE: &str = "Range";
pub const REQUIRE: &str = "Require";
pub const RTP_INFO: &str = "RTP-Info";
pub const SERVER: &str = "Server";
pub const SESSION: &str = "Session";
pub const SUPPORTED: &str = "Supported";
pub const TRANSPORT: &str = "Transport";
pub const UNSUPPORTED: &str = "Unsupported";
pub const USER_AGENT: &str = "User-Agent";
pub const VIA: &str = "Via";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
