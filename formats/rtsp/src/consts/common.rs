pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';
pub const SPACE: u8 = b' ';
pub const CR_STR: &str = "\r";
pub const LF_STR: &str = "\n";
pub const CRLF_STR: &str = "\r\n";
pub const SPACE_STR: &str = " ";
