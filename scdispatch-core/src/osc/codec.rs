use super::error::OscError;
use super::types::{NtpTimeTag, OscArg, OscBundleOwned, OscMessageOwned, OscPacketOwned};

fn pad_len_with_terminator(raw_len: usize) -> usize {
    let total = raw_len + 1;
    (total + 3) & !3
}

fn pad_len_blob(raw_len: usize) -> usize {
    (raw_len + 3) & !3
}

fn read_osc_string(buf: &[u8], offset: usize) -> Result<(String, usize), OscError> {
    let nul = buf[offset..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| OscError::truncated(offset))?;
    let s = std::str::from_utf8(&buf[offset..offset + nul])
        .map_err(|_| OscError::bad_address(offset, true))?
        .to_string();
    let padded = pad_len_with_terminator(nul);
    let new_offset = offset + padded;
    if new_offset > buf.len() {
        return Err(OscError::truncated(offset));
    }
    Ok((s, new_offset))
}

fn read_blob(buf: &[u8], offset: usize) -> Result<(Vec<u8>, usize), OscError> {
    if buf.len() < offset + 4 {
        return Err(OscError::truncated(offset));
    }
    let len = i32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap());
    if len < 0 {
        return Err(OscError::truncated(offset));
    }
    let len = len as usize;
    let data_start = offset + 4;
    let padded = pad_len_blob(len);
    let new_offset = data_start + padded;
    if new_offset > buf.len() {
        return Err(OscError::truncated(offset));
    }
    Ok((buf[data_start..data_start + len].to_vec(), new_offset))
}

/// Decode a single OSC packet (message or bundle) from `buf`, starting at
/// byte 0. `id_tag` is the configured opaque-identifier type tag (config
/// option `ntpIdentifierType`).
pub fn decode(buf: &[u8], id_tag: u8) -> Result<OscPacketOwned, OscError> {
    decode_packet(buf, id_tag).map(|(packet, _)| packet)
}

fn decode_packet(buf: &[u8], id_tag: u8) -> Result<(OscPacketOwned, usize), OscError> {
    if buf.len() >= 8 && &buf[0..8] == b"#bundle\0" {
        decode_bundle(buf, id_tag)
    } else {
        decode_message(buf, id_tag)
    }
}

fn decode_bundle(buf: &[u8], id_tag: u8) -> Result<(OscPacketOwned, usize), OscError> {
    let mut pos = 8;
    if buf.len() < pos + 8 {
        return Err(OscError::truncated(pos));
    }
    let seconds = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    let fraction = u32::from_be_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
    pos += 8;

    let mut elements = Vec::new();
    while pos < buf.len() {
        if buf.len() < pos + 4 {
            return Err(OscError::truncated(pos));
        }
        let size = i32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
        if size < 0 {
            return Err(OscError::truncated(pos));
        }
        let size = size as usize;
        pos += 4;
        if buf.len() < pos + size {
            return Err(OscError::truncated(pos));
        }
        let (elem, _) = decode_packet(&buf[pos..pos + size], id_tag)?;
        elements.push(elem);
        pos += size;
    }

    Ok((
        OscPacketOwned::Bundle(OscBundleOwned { timetag: NtpTimeTag { seconds, fraction }, elements }),
        pos,
    ))
}

fn decode_message(buf: &[u8], id_tag: u8) -> Result<(OscPacketOwned, usize), OscError> {
    let (address, mut pos) = read_osc_string(buf, 0)?;
    if !address.starts_with('/') {
        return Err(OscError::bad_address(0, false));
    }
    if !address.is_ascii() {
        return Err(OscError::bad_address(0, true));
    }

    if pos >= buf.len() || buf[pos] != b',' {
        return Ok((OscPacketOwned::Message(OscMessageOwned { address, args: Vec::new() }), pos));
    }

    let (typetag, new_pos) = read_osc_string(buf, pos)?;
    pos = new_pos;

    let mut args = Vec::with_capacity(typetag.len().saturating_sub(1));
    for tag in typetag.bytes().skip(1) {
        match tag {
            b'i' => {
                if buf.len() < pos + 4 {
                    return Err(OscError::truncated(pos));
                }
                let v = i32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
                args.push(OscArg::Int32(v));
                pos += 4;
            }
            b'f' => {
                if buf.len() < pos + 4 {
                    return Err(OscError::truncated(pos));
                }
                let v = f32::from_bits(u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()));
                args.push(OscArg::Float32(v));
                pos += 4;
            }
            b's' => {
                let (s, np) = read_osc_string(buf, pos)?;
                args.push(OscArg::String(s));
                pos = np;
            }
            b'b' => {
                let (blob, np) = read_blob(buf, pos)?;
                args.push(OscArg::Blob(blob));
                pos = np;
            }
            b't' => {
                if buf.len() < pos + 8 {
                    return Err(OscError::truncated(pos));
                }
                let seconds = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
                let fraction = u32::from_be_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
                args.push(OscArg::TimeTag(NtpTimeTag { seconds, fraction }));
                pos += 8;
            }
            other if other == id_tag => {
                if buf.len() < pos + 16 {
                    return Err(OscError::truncated(pos));
                }
                let mut id = [0u8; 16];
                id.copy_from_slice(&buf[pos..pos + 16]);
                args.push(OscArg::Uuid16(id));
                pos += 16;
            }
            other => return Err(OscError::unknown_tag(pos, other)),
        }
    }

    Ok((OscPacketOwned::Message(OscMessageOwned { address, args }), pos))
}

fn write_padded_string_into(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    let padded = pad_len_with_terminator(s.len());
    out.resize(out.len() + (padded - s.len()), 0);
}

fn typetag_string(args: &[OscArg], id_tag: u8) -> String {
    let mut s = String::with_capacity(args.len() + 1);
    s.push(',');
    for a in args {
        s.push(match a {
            OscArg::Int32(_) => 'i',
            OscArg::Float32(_) => 'f',
            OscArg::String(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::TimeTag(_) => 't',
            OscArg::Uuid16(_) => id_tag as char,
        });
    }
    s
}

fn encode_message_into(out: &mut Vec<u8>, msg: &OscMessageOwned, id_tag: u8) {
    write_padded_string_into(out, &msg.address);
    write_padded_string_into(out, &typetag_string(&msg.args, id_tag));
    for a in &msg.args {
        match a {
            OscArg::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Float32(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            OscArg::String(s) => write_padded_string_into(out, s),
            OscArg::Blob(b) => {
                out.extend_from_slice(&(b.len() as i32).to_be_bytes());
                out.extend_from_slice(b);
                let padded = pad_len_blob(b.len());
                out.resize(out.len() + (padded - b.len()), 0);
            }
            OscArg::TimeTag(t) => {
                out.extend_from_slice(&t.seconds.to_be_bytes());
                out.extend_from_slice(&t.fraction.to_be_bytes());
            }
            OscArg::Uuid16(id) => out.extend_from_slice(id),
        }
    }
}

fn encode_packet_into(out: &mut Vec<u8>, packet: &OscPacketOwned, id_tag: u8) {
    match packet {
        OscPacketOwned::Message(m) => encode_message_into(out, m, id_tag),
        OscPacketOwned::Bundle(b) => {
            out.extend_from_slice(b"#bundle\0");
            out.extend_from_slice(&b.timetag.seconds.to_be_bytes());
            out.extend_from_slice(&b.timetag.fraction.to_be_bytes());
            for elem in &b.elements {
                let mut inner = Vec::new();
                encode_packet_into(&mut inner, elem, id_tag);
                out.extend_from_slice(&(inner.len() as i32).to_be_bytes());
                out.extend_from_slice(&inner);
            }
        }
    }
}

/// Allocating encoder for interactive / low-rate calls.
pub fn encode_general(packet: &OscPacketOwned, id_tag: u8) -> Vec<u8> {
    let mut out = Vec::new();
    encode_packet_into(&mut out, packet, id_tag);
    out
}

fn write_bytes(buf: &mut [u8], pos: &mut usize, data: &[u8]) -> Result<(), OscError> {
    let end = *pos + data.len();
    if end > buf.len() {
        return Err(OscError::buffer_too_small(*pos));
    }
    buf[*pos..end].copy_from_slice(data);
    *pos = end;
    Ok(())
}

fn write_padded_string_fast(buf: &mut [u8], pos: &mut usize, s: &str) -> Result<(), OscError> {
    write_bytes(buf, pos, s.as_bytes())?;
    let padded = pad_len_with_terminator(s.len());
    let zeros = padded - s.len();
    write_bytes(buf, pos, &vec![0u8; zeros])
}

fn encode_message_fast(buf: &mut [u8], pos: &mut usize, msg: &OscMessageOwned, id_tag: u8) -> Result<(), OscError> {
    write_padded_string_fast(buf, pos, &msg.address)?;
    write_padded_string_fast(buf, pos, &typetag_string(&msg.args, id_tag))?;
    for a in &msg.args {
        match a {
            OscArg::Int32(v) => write_bytes(buf, pos, &v.to_be_bytes())?,
            OscArg::Float32(v) => write_bytes(buf, pos, &v.to_bits().to_be_bytes())?,
            OscArg::String(s) => write_padded_string_fast(buf, pos, s)?,
            OscArg::Blob(b) => {
                write_bytes(buf, pos, &(b.len() as i32).to_be_bytes())?;
                write_bytes(buf, pos, b)?;
                let padded = pad_len_blob(b.len());
                write_bytes(buf, pos, &vec![0u8; padded - b.len()])?;
            }
            OscArg::TimeTag(t) => {
                write_bytes(buf, pos, &t.seconds.to_be_bytes())?;
                write_bytes(buf, pos, &t.fraction.to_be_bytes())?;
            }
            OscArg::Uuid16(id) => write_bytes(buf, pos, id)?,
        }
    }
    Ok(())
}

/// Zero-allocation fast path: writes a bare message, or (when `timetag` is
/// given) a single-message bundle, into a pre-sized buffer. Used by the
/// prescheduler and the direct-write fast path where allocation would
/// perturb scheduling jitter.
///
/// Returns the number of bytes written.
pub fn encode_fast(
    buf: &mut [u8],
    timetag: Option<NtpTimeTag>,
    msg: &OscMessageOwned,
    id_tag: u8,
) -> Result<usize, OscError> {
    let mut pos = 0usize;
    match timetag {
        None => {
            encode_message_fast(buf, &mut pos, msg, id_tag)?;
        }
        Some(tt) => {
            write_bytes(buf, &mut pos, b"#bundle\0")?;
            write_bytes(buf, &mut pos, &tt.seconds.to_be_bytes())?;
            write_bytes(buf, &mut pos, &tt.fraction.to_be_bytes())?;
            let size_pos = pos;
            write_bytes(buf, &mut pos, &[0u8; 4])?;
            let msg_start = pos;
            encode_message_fast(buf, &mut pos, msg, id_tag)?;
            let msg_len = (pos - msg_start) as i32;
            buf[size_pos..size_pos + 4].copy_from_slice(&msg_len.to_be_bytes());
        }
    }
    Ok(pos)
}
