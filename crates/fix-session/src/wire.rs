//! Minimal FIX tag-value framing.
//!
//! Only the tags the session state machine itself inspects are decoded;
//! everything else in a frame is kept as opaque payload bytes and handed
//! through untouched. Full dictionary-driven encode/decode is out of
//! scope — this is the concrete shape of the `header` parameter
//! `on_message` is built against, not a general FIX codec.

const SOH: u8 = 0x01;

pub const TAG_BEGIN_STRING: u32 = 8;
pub const TAG_BODY_LENGTH: u32 = 9;
pub const TAG_CHECKSUM: u32 = 10;
pub const TAG_MSG_SEQ_NUM: u32 = 34;
pub const TAG_MSG_TYPE: u32 = 35;
pub const TAG_POSS_DUP_FLAG: u32 = 43;
pub const TAG_SENDER_COMP_ID: u32 = 49;
pub const TAG_SENDING_TIME: u32 = 52;
pub const TAG_TARGET_COMP_ID: u32 = 56;
pub const TAG_ENCRYPT_METHOD: u32 = 98;
pub const TAG_HEART_BT_INT: u32 = 108;
pub const TAG_TEST_REQ_ID: u32 = 112;
pub const TAG_RESET_SEQ_NUM_FLAG: u32 = 141;
pub const TAG_BEGIN_SEQ_NO: u32 = 7;
pub const TAG_END_SEQ_NO: u32 = 16;
pub const TAG_NEW_SEQ_NO: u32 = 36;
pub const TAG_GAP_FILL_FLAG: u32 = 123;
pub const TAG_USERNAME: u32 = 553;
pub const TAG_PASSWORD: u32 = 554;

pub const MSG_TYPE_HEARTBEAT: &str = "0";
pub const MSG_TYPE_TEST_REQUEST: &str = "1";
pub const MSG_TYPE_RESEND_REQUEST: &str = "2";
pub const MSG_TYPE_REJECT: &str = "3";
pub const MSG_TYPE_SEQUENCE_RESET: &str = "4";
pub const MSG_TYPE_LOGOUT: &str = "5";
pub const MSG_TYPE_LOGON: &str = "A";

/// Parsed header fields the session inspects. Any tag not named here is
/// left in the raw frame, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixHeader {
    pub msg_type: String,
    pub msg_seq_num: u64,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub sending_time: String,
    pub poss_dup: bool,
    pub heart_bt_int: Option<u32>,
    pub test_req_id: Option<String>,
    pub reset_seq_num_flag: bool,
    pub begin_seq_no: Option<u64>,
    pub end_seq_no: Option<u64>,
    pub new_seq_no: Option<u64>,
    pub gap_fill_flag: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Decode the tags the session cares about out of an SOH-delimited frame.
/// Returns `Err` with a human-readable reason on missing required tags or
/// unparseable integers — both are folded into
/// [`crate::SessionError::InvalidMessage`] by the caller.
pub fn decode_header(raw: &[u8]) -> Result<FixHeader, String> {
    let mut msg_type = None;
    let mut msg_seq_num = None;
    let mut sender_comp_id = None;
    let mut target_comp_id = None;
    let mut sending_time = None;
    let mut poss_dup = false;
    let mut heart_bt_int = None;
    let mut test_req_id = None;
    let mut reset_seq_num_flag = false;
    let mut begin_seq_no = None;
    let mut end_seq_no = None;
    let mut new_seq_no = None;
    let mut gap_fill_flag = false;
    let mut username = None;
    let mut password = None;

    for field in raw.split(|&b| b == SOH) {
        if field.is_empty() {
            continue;
        }
        let eq = field
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| "field missing '='".to_owned())?;
        let (tag_bytes, value_bytes) = (&field[..eq], &field[eq + 1..]);
        let tag: u32 = std::str::from_utf8(tag_bytes)
            .map_err(|_| "non-utf8 tag".to_owned())?
            .parse()
            .map_err(|_| "non-numeric tag".to_owned())?;
        let value = std::str::from_utf8(value_bytes)
            .map_err(|_| "non-utf8 value".to_owned())?
            .to_owned();

        match tag {
            TAG_MSG_TYPE => msg_type = Some(value),
            TAG_MSG_SEQ_NUM => {
                msg_seq_num = Some(value.parse::<u64>().map_err(|_| "bad MsgSeqNum".to_owned())?)
            }
            TAG_SENDER_COMP_ID => sender_comp_id = Some(value),
            TAG_TARGET_COMP_ID => target_comp_id = Some(value),
            TAG_SENDING_TIME => sending_time = Some(value),
            TAG_POSS_DUP_FLAG => poss_dup = value == "Y",
            TAG_HEART_BT_INT => {
                heart_bt_int = Some(value.parse::<u32>().map_err(|_| "bad HeartBtInt".to_owned())?)
            }
            TAG_TEST_REQ_ID => test_req_id = Some(value),
            TAG_RESET_SEQ_NUM_FLAG => reset_seq_num_flag = value == "Y",
            TAG_BEGIN_SEQ_NO => {
                begin_seq_no = Some(value.parse::<u64>().map_err(|_| "bad BeginSeqNo".to_owned())?)
            }
            TAG_END_SEQ_NO => {
                end_seq_no = Some(value.parse::<u64>().map_err(|_| "bad EndSeqNo".to_owned())?)
            }
            TAG_NEW_SEQ_NO => {
                new_seq_no = Some(value.parse::<u64>().map_err(|_| "bad NewSeqNo".to_owned())?)
            }
            TAG_GAP_FILL_FLAG => gap_fill_flag = value == "Y",
            TAG_USERNAME => username = Some(value),
            TAG_PASSWORD => password = Some(value),
            // BeginString / BodyLength / CheckSum / EncryptMethod are
            // interpreted-but-unused by the session itself.
            TAG_BEGIN_STRING | TAG_BODY_LENGTH | TAG_CHECKSUM | TAG_ENCRYPT_METHOD => {}
            _ => {}
        }
    }

    Ok(FixHeader {
        msg_type: msg_type.ok_or_else(|| "missing MsgType(35)".to_owned())?,
        msg_seq_num: msg_seq_num.ok_or_else(|| "missing MsgSeqNum(34)".to_owned())?,
        sender_comp_id: sender_comp_id.ok_or_else(|| "missing SenderCompID(49)".to_owned())?,
        target_comp_id: target_comp_id.ok_or_else(|| "missing TargetCompID(56)".to_owned())?,
        sending_time: sending_time.unwrap_or_default(),
        poss_dup,
        heart_bt_int,
        test_req_id,
        reset_seq_num_flag,
        begin_seq_no,
        end_seq_no,
        new_seq_no,
        gap_fill_flag,
        username,
        password,
    })
}

/// Stamps the header fields a session is responsible for (MsgSeqNum,
/// SenderCompID, TargetCompID, SendingTime, and on replay PossDupFlag /
/// OrigSendingTime) around caller-supplied body fields, and appends a
/// BodyLength/CheckSum trailer so the frame is self-describing on the wire.
pub struct MessageBuilder<'a> {
    pub sender_comp_id: &'a str,
    pub target_comp_id: &'a str,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(sender_comp_id: &'a str, target_comp_id: &'a str) -> Self {
        Self {
            sender_comp_id,
            target_comp_id,
        }
    }

    /// `orig_sending_time` is `Some` only when replaying with PossDupFlag=Y.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        msg_type: &str,
        msg_seq_num: u64,
        sending_time_ns: u64,
        poss_dup: bool,
        orig_sending_time: Option<&str>,
        extra_fields: &[(u32, String)],
    ) -> Vec<u8> {
        let sending_time = format_sending_time(sending_time_ns);
        let mut body = Vec::new();
        push_field(&mut body, TAG_MSG_TYPE, msg_type);
        push_field(&mut body, TAG_SENDER_COMP_ID, self.sender_comp_id);
        push_field(&mut body, TAG_TARGET_COMP_ID, self.target_comp_id);
        push_field(&mut body, TAG_MSG_SEQ_NUM, &msg_seq_num.to_string());
        push_field(&mut body, TAG_SENDING_TIME, &sending_time);
        if poss_dup {
            push_field(&mut body, TAG_POSS_DUP_FLAG, "Y");
            if let Some(orig) = orig_sending_time {
                push_field(&mut body, 122, orig); // OrigSendingTime
            }
        }
        for (tag, value) in extra_fields {
            push_field(&mut body, *tag, value);
        }

        let mut frame = Vec::new();
        push_field(&mut frame, TAG_BEGIN_STRING, "FIX.4.4");
        push_field(&mut frame, TAG_BODY_LENGTH, &body.len().to_string());
        frame.extend_from_slice(&body);
        let checksum = body.iter().fold(0u32, |acc, &b| acc + b as u32) % 256;
        push_field(&mut frame, TAG_CHECKSUM, &format!("{checksum:03}"));
        frame
    }
}

fn push_field(out: &mut Vec<u8>, tag: u32, value: &str) {
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b'=');
    out.extend_from_slice(value.as_bytes());
    out.push(SOH);
}

/// Nanoseconds since epoch, rendered `YYYYMMDD-HH:MM:SS.mmm` is the FIX wire
/// format; since wall-clock formatting is outside this session's concerns,
/// this renders the raw nanosecond count instead of a calendar timestamp.
fn format_sending_time(sending_time_ns: u64) -> String {
    sending_time_ns.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header_extracts_known_tags_and_ignores_others() {
        let raw = b"35=A\x0134=1\x0149=INIT\x0156=ACPT\x0152=123\x01141=Y\x01999=ignored\x01";
        let header = decode_header(raw).unwrap();
        assert_eq!(header.msg_type, "A");
        assert_eq!(header.msg_seq_num, 1);
        assert_eq!(header.sender_comp_id, "INIT");
        assert_eq!(header.target_comp_id, "ACPT");
        assert!(header.reset_seq_num_flag);
    }

    #[test]
    fn decode_header_rejects_missing_required_tag() {
        let raw = b"34=1\x0149=INIT\x0156=ACPT\x01";
        assert!(decode_header(raw).is_err());
    }

    #[test]
    fn build_stamps_seq_no_and_comp_ids() {
        let builder = MessageBuilder::new("INIT", "ACPT");
        let frame = builder.build(MSG_TYPE_HEARTBEAT, 5, 1_000, false, None, &[]);
        let header = decode_header(&frame).unwrap();
        assert_eq!(header.msg_seq_num, 5);
        assert_eq!(header.sender_comp_id, "INIT");
        assert_eq!(header.target_comp_id, "ACPT");
        assert!(!header.poss_dup);
    }

    #[test]
    fn build_with_poss_dup_stamps_orig_sending_time() {
        let builder = MessageBuilder::new("INIT", "ACPT");
        let frame = builder.build(MSG_TYPE_HEARTBEAT, 5, 2_000, true, Some("1999"), &[]);
        let header = decode_header(&frame).unwrap();
        assert!(header.poss_dup);
    }
}
