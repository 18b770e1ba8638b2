//! C5: command/reply catalogue — one encode/decode pair per defined
//! record (spec §4.5).
//!
//! Every decoder validates exact (or minimum, for variable-length records)
//! length and range-checks enumerated fields before returning a value;
//! violations return [`NakCode::Record`] rather than a partial/garbage
//! value, matching `original_source/src/osdp_pd.c`'s `pd_decode_command`
//! length checks (e.g. `CMD_CHLNG length mismatch! %d/8`). Every encoder
//! refuses to write past a caller-supplied buffer rather than truncate.

use heapless::Vec;

use crate::config::NUM_CAP_CODES;
use crate::error::{Error, NakCode};
use crate::pd_model::Capability;

pub mod opcode {
	pub const POLL: u8 = 0x60;
	pub const ID: u8 = 0x61;
	pub const CAP: u8 = 0x62;
	pub const LSTAT: u8 = 0x64;
	pub const ISTAT: u8 = 0x65;
	pub const OSTAT: u8 = 0x66;
	pub const RSTAT: u8 = 0x67;
	pub const OUT: u8 = 0x68;
	pub const LED: u8 = 0x69;
	pub const BUZ: u8 = 0x6A;
	pub const TEXT: u8 = 0x6B;
	pub const COMSET: u8 = 0x6E;
	pub const KEYSET: u8 = 0x75;
	pub const CHLNG: u8 = 0x76;
	pub const SCRYPT: u8 = 0x77;
	pub const FILETRANSFER: u8 = 0x7C;
	pub const MFG: u8 = 0x80;

	pub const ACK: u8 = 0x40;
	pub const NAK: u8 = 0x41;
	pub const PDID: u8 = 0x45;
	pub const PDCAP: u8 = 0x46;
	pub const LSTATR: u8 = 0x48;
	pub const ISTATR: u8 = 0x49;
	pub const OSTATR: u8 = 0x4A;
	pub const RSTATR: u8 = 0x4B;
	pub const RAW: u8 = 0x50;
	pub const FMT: u8 = 0x51;
	pub const COM: u8 = 0x54;
	pub const KEYPPAD: u8 = 0x61;
	pub const CCRYPT: u8 = 0x76;
	pub const RMAC_I: u8 = 0x78;
	pub const BUSY: u8 = 0x79;
	pub const FTSTAT: u8 = 0x7A;
	pub const MFGREP: u8 = 0x90;
}

pub const TEXT_MAX_LEN: usize = 32;
pub const KEYSET_KEY_MAX_LEN: usize = 32;
pub const MFG_MAX_DATALEN: usize = 64;
pub const CARD_DATA_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCommand {
	pub output_no: u8,
	pub control_code: u8,
	pub timer_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedParams {
	pub control_code: u8,
	pub on_count: u8,
	pub off_count: u8,
	pub on_color: u8,
	pub off_color: u8,
	pub timer_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
	pub reader: u8,
	pub led_number: u8,
	pub temporary: LedParams,
	pub permanent: LedParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzerCommand {
	pub reader: u8,
	pub control_code: u8,
	pub on_count: u8,
	pub off_count: u8,
	pub rep_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCommand {
	pub reader: u8,
	pub control_code: u8,
	pub temp_time: u8,
	pub offset_row: u8,
	pub offset_col: u8,
	pub data: Vec<u8, TEXT_MAX_LEN>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComsetCommand {
	pub address: u8,
	pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetCommand {
	pub key_type: u8,
	pub data: Vec<u8, KEYSET_KEY_MAX_LEN>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfgCommand {
	pub vendor_code: [u8; 3],
	pub command: u8,
	pub data: Vec<u8, MFG_MAX_DATALEN>,
}

/// File-transfer status values carried in [`FileTransferStatusReply::status`]
/// (spec §4.8: one reply per chunk, advancing the cursor, until completion).
pub mod file_tx_status {
	pub const OK: i8 = 0;
	pub const FINISH: i8 = 1;
	pub const ABORT: i8 = -1;
}

pub const FILE_FRAGMENT_MAX: usize = crate::config::FILE_FRAGMENT_MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferCommand {
	pub file_id: u8,
	pub total_size: u32,
	pub offset: u32,
	pub cancel: bool,
	pub data: Vec<u8, FILE_FRAGMENT_MAX>,
}

/// A decoded command received by a PD (spec §4.5 catalogue, command half).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Poll,
	Id,
	Cap,
	Lstat,
	Istat,
	Ostat,
	Rstat,
	Out(OutputCommand),
	Led(LedCommand),
	Buz(BuzzerCommand),
	Text(TextCommand),
	Comset(ComsetCommand),
	Keyset(KeysetCommand),
	Chlng([u8; 8]),
	Scrypt([u8; 16]),
	FileTransfer(FileTransferCommand),
	Mfg(MfgCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdIdReply {
	pub vendor_oui: [u8; 3],
	pub model: u8,
	pub version: u8,
	pub serial: [u8; 4],
	pub firmware: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStatusReply {
	pub tamper: bool,
	pub power: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComsetReply {
	pub address: u8,
	pub baud_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTransferStatusReply {
	pub status: i8,
	pub offset: u32,
	pub delay_ms: u16,
}

/// A decoded reply received by a CP (spec §4.5 catalogue, reply half).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
	Ack,
	Nak(NakCode),
	PdId(PdIdReply),
	PdCap(Vec<Capability, NUM_CAP_CODES>),
	LStat(LocalStatusReply),
	/// Input status bitmap, one bit per zone, MSB-first within each byte.
	IStat(Vec<u8, 8>),
	/// Output status bitmap, one bit per relay.
	OStat(Vec<u8, 8>),
	/// Reader tamper/status bitmap.
	RStat(Vec<u8, 8>),
	Com(ComsetReply),
	Ccrypt {
		pd_client_uid: [u8; 8],
		pd_random: [u8; 8],
		pd_cryptogram: [u8; 16],
	},
	RMacI([u8; 16]),
	FtStat(FileTransferStatusReply),
	/// Raw/Wiegand card data: `length` is in bits (spec §4.5).
	CardRead {
		reader_no: u8,
		format_is_ascii: bool,
		length: u16,
		data: Vec<u8, CARD_DATA_MAX_LEN>,
	},
	KeypadEvent {
		reader_no: u8,
		data: Vec<u8, 16>,
	},
	MfgRep(MfgCommand),
}

fn u16_le(buf: &[u8], pos: usize) -> u16 {
	(buf[pos] as u16) | ((buf[pos + 1] as u16) << 8)
}

fn write_u16_le(out: &mut [u8], pos: usize, v: u16) {
	out[pos] = (v & 0xFF) as u8;
	out[pos + 1] = ((v >> 8) & 0xFF) as u8;
}

fn u32_le(buf: &[u8], pos: usize) -> u32 {
	(buf[pos] as u32) | ((buf[pos + 1] as u32) << 8) | ((buf[pos + 2] as u32) << 16) | ((buf[pos + 3] as u32) << 24)
}

fn write_u32_le(out: &mut [u8], pos: usize, v: u32) {
	out[pos] = (v & 0xFF) as u8;
	out[pos + 1] = ((v >> 8) & 0xFF) as u8;
	out[pos + 2] = ((v >> 16) & 0xFF) as u8;
	out[pos + 3] = ((v >> 24) & 0xFF) as u8;
}

fn read_led_params(buf: &[u8]) -> LedParams {
	LedParams {
		control_code: buf[0],
		on_count: buf[1],
		off_count: buf[2],
		on_color: buf[3],
		off_color: buf[4],
		timer_count: u16_le(buf, 5),
	}
}

fn write_led_params(out: &mut [u8], p: &LedParams) {
	out[0] = p.control_code;
	out[1] = p.on_count;
	out[2] = p.off_count;
	out[3] = p.on_color;
	out[4] = p.off_color;
	write_u16_le(out, 5, p.timer_count);
}

/// Decodes a command body (opcode byte already stripped) per spec §4.5.
/// Returns [`NakCode::CmdUnknown`] for an opcode not in the catalogue,
/// [`NakCode::Record`] for a length/range violation.
pub fn decode_command(op: u8, body: &[u8]) -> Result<Command, NakCode> {
	use opcode::*;
	match op {
		POLL => Ok(Command::Poll),
		ID => Ok(Command::Id),
		CAP => Ok(Command::Cap),
		LSTAT => Ok(Command::Lstat),
		ISTAT => Ok(Command::Istat),
		OSTAT => Ok(Command::Ostat),
		RSTAT => Ok(Command::Rstat),
		OUT => {
			if body.len() != 4 {
				return Err(NakCode::CmdLen);
			}
			Ok(Command::Out(OutputCommand {
				output_no: body[0],
				control_code: body[1],
				timer_count: u16_le(body, 2),
			}))
		}
		LED => {
			if body.len() != 16 {
				return Err(NakCode::CmdLen);
			}
			Ok(Command::Led(LedCommand {
				reader: body[0],
				led_number: body[1],
				temporary: read_led_params(&body[2..9]),
				permanent: read_led_params(&body[9..16]),
			}))
		}
		BUZ => {
			if body.len() != 5 {
				return Err(NakCode::CmdLen);
			}
			Ok(Command::Buz(BuzzerCommand {
				reader: body[0],
				control_code: body[1],
				on_count: body[2],
				off_count: body[3],
				rep_count: body[4],
			}))
		}
		TEXT => {
			if body.len() < 6 {
				return Err(NakCode::CmdLen);
			}
			let length = body[5] as usize;
			if body.len() != 6 + length || length > TEXT_MAX_LEN {
				return Err(NakCode::CmdLen);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[6..6 + length]).map_err(|_| NakCode::CmdLen)?;
			Ok(Command::Text(TextCommand {
				reader: body[0],
				control_code: body[1],
				temp_time: body[2],
				offset_row: body[3],
				offset_col: body[4],
				data,
			}))
		}
		COMSET => {
			if body.len() != 5 {
				return Err(NakCode::CmdLen);
			}
			Ok(Command::Comset(ComsetCommand {
				address: body[0],
				baud_rate: u32_le(body, 1),
			}))
		}
		KEYSET => {
			if body.len() < 2 {
				return Err(NakCode::CmdLen);
			}
			let length = body[1] as usize;
			if body.len() != 2 + length || length > KEYSET_KEY_MAX_LEN {
				return Err(NakCode::CmdLen);
			}
			if body[0] != 0x01 {
				return Err(NakCode::Record);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[2..2 + length]).map_err(|_| NakCode::CmdLen)?;
			Ok(Command::Keyset(KeysetCommand { key_type: body[0], data }))
		}
		CHLNG => {
			if body.len() != 8 {
				return Err(NakCode::CmdLen);
			}
			let mut cp_random = [0u8; 8];
			cp_random.copy_from_slice(body);
			Ok(Command::Chlng(cp_random))
		}
		SCRYPT => {
			if body.len() != 16 {
				return Err(NakCode::CmdLen);
			}
			let mut cryptogram = [0u8; 16];
			cryptogram.copy_from_slice(body);
			Ok(Command::Scrypt(cryptogram))
		}
		FILETRANSFER => {
			// `file_id(1) | total_size(4 LE) | offset(4 LE) | frag_len(2 LE) |
			// flags(1, bit0 = cancel) | data(frag_len)` (spec §4.8: each
			// command carries an (offset, chunk) tuple).
			if body.len() < 12 {
				return Err(NakCode::CmdLen);
			}
			let frag_len = u16_le(body, 9) as usize;
			if body.len() != 12 + frag_len || frag_len > FILE_FRAGMENT_MAX {
				return Err(NakCode::CmdLen);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[12..12 + frag_len]).map_err(|_| NakCode::CmdLen)?;
			Ok(Command::FileTransfer(FileTransferCommand {
				file_id: body[0],
				total_size: u32_le(body, 1),
				offset: u32_le(body, 5),
				cancel: body[11] & 0x01 != 0,
				data,
			}))
		}
		MFG => {
			if body.len() < 4 {
				return Err(NakCode::CmdLen);
			}
			let length = body[4] as usize;
			if body.len() != 5 + length || length > MFG_MAX_DATALEN {
				return Err(NakCode::CmdLen);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[5..5 + length]).map_err(|_| NakCode::CmdLen)?;
			Ok(Command::Mfg(MfgCommand {
				vendor_code: [body[0], body[1], body[2]],
				command: body[3],
				data,
			}))
		}
		_ => Err(NakCode::CmdUnknown),
	}
}

/// Encodes a command body (without the leading opcode byte). Returns the
/// opcode and the number of bytes written.
pub fn encode_command(cmd: &Command, out: &mut [u8]) -> Result<(u8, usize), Error> {
	use opcode::*;
	let needed = |n: usize| -> Result<(), Error> {
		if out.len() < n {
			Err(Error::BufferTooSmall)
		} else {
			Ok(())
		}
	};
	match cmd {
		Command::Poll => Ok((POLL, 0)),
		Command::Id => {
			needed(1)?;
			out[0] = 0x00;
			Ok((ID, 1))
		}
		Command::Cap => Ok((CAP, 0)),
		Command::Lstat => Ok((LSTAT, 0)),
		Command::Istat => Ok((ISTAT, 0)),
		Command::Ostat => Ok((OSTAT, 0)),
		Command::Rstat => Ok((RSTAT, 0)),
		Command::Out(c) => {
			needed(4)?;
			out[0] = c.output_no;
			out[1] = c.control_code;
			write_u16_le(out, 2, c.timer_count);
			Ok((OUT, 4))
		}
		Command::Led(c) => {
			needed(16)?;
			out[0] = c.reader;
			out[1] = c.led_number;
			write_led_params(&mut out[2..9], &c.temporary);
			write_led_params(&mut out[9..16], &c.permanent);
			Ok((LED, 16))
		}
		Command::Buz(c) => {
			needed(5)?;
			out[0] = c.reader;
			out[1] = c.control_code;
			out[2] = c.on_count;
			out[3] = c.off_count;
			out[4] = c.rep_count;
			Ok((BUZ, 5))
		}
		Command::Text(c) => {
			needed(6 + c.data.len())?;
			out[0] = c.reader;
			out[1] = c.control_code;
			out[2] = c.temp_time;
			out[3] = c.offset_row;
			out[4] = c.offset_col;
			out[5] = c.data.len() as u8;
			out[6..6 + c.data.len()].copy_from_slice(&c.data);
			Ok((TEXT, 6 + c.data.len()))
		}
		Command::Comset(c) => {
			needed(5)?;
			out[0] = c.address;
			write_u32_le(out, 1, c.baud_rate);
			Ok((COMSET, 5))
		}
		Command::Keyset(c) => {
			needed(2 + c.data.len())?;
			out[0] = c.key_type;
			out[1] = c.data.len() as u8;
			out[2..2 + c.data.len()].copy_from_slice(&c.data);
			Ok((KEYSET, 2 + c.data.len()))
		}
		Command::Chlng(r) => {
			needed(8)?;
			out[..8].copy_from_slice(r);
			Ok((CHLNG, 8))
		}
		Command::Scrypt(c) => {
			needed(16)?;
			out[..16].copy_from_slice(c);
			Ok((SCRYPT, 16))
		}
		Command::FileTransfer(c) => {
			needed(12 + c.data.len())?;
			out[0] = c.file_id;
			write_u32_le(out, 1, c.total_size);
			write_u32_le(out, 5, c.offset);
			write_u16_le(out, 9, c.data.len() as u16);
			out[11] = if c.cancel { 0x01 } else { 0x00 };
			out[12..12 + c.data.len()].copy_from_slice(&c.data);
			Ok((FILETRANSFER, 12 + c.data.len()))
		}
		Command::Mfg(c) => {
			needed(5 + c.data.len())?;
			out[0..3].copy_from_slice(&c.vendor_code);
			out[3] = c.command;
			out[4] = c.data.len() as u8;
			out[5..5 + c.data.len()].copy_from_slice(&c.data);
			Ok((MFG, 5 + c.data.len()))
		}
	}
}

/// Decodes a reply body given the reply opcode byte (spec §4.5, reply
/// half). Returns [`Error::CmdUnknown`] for an opcode not in the
/// catalogue, [`Error::RecordInvalid`] for a length/range violation.
pub fn decode_reply(op: u8, body: &[u8]) -> Result<Reply, Error> {
	use opcode::*;
	match op {
		ACK => Ok(Reply::Ack),
		NAK => {
			if body.is_empty() {
				return Err(Error::RecordInvalid);
			}
			Ok(Reply::Nak(NakCode::from_u8(body[0])))
		}
		PDID => {
			if body.len() != 12 {
				return Err(Error::RecordInvalid);
			}
			Ok(Reply::PdId(PdIdReply {
				vendor_oui: [body[0], body[1], body[2]],
				model: body[3],
				version: body[4],
				serial: [body[5], body[6], body[7], body[8]],
				firmware: [body[9], body[10], body[11]],
			}))
		}
		PDCAP => {
			if body.len() % 3 != 0 {
				return Err(Error::RecordInvalid);
			}
			let mut caps = Vec::new();
			for chunk in body.chunks_exact(3) {
				caps
					.push(Capability {
						function_code: chunk[0],
						compliance_level: chunk[1],
						num_items: chunk[2],
					})
					.map_err(|_| Error::RecordInvalid)?;
			}
			Ok(Reply::PdCap(caps))
		}
		LSTATR => {
			if body.len() != 2 {
				return Err(Error::RecordInvalid);
			}
			Ok(Reply::LStat(LocalStatusReply {
				tamper: body[0] != 0,
				power: body[1] != 0,
			}))
		}
		ISTATR => bitmap_reply(body).map(Reply::IStat),
		OSTATR => bitmap_reply(body).map(Reply::OStat),
		RSTATR => bitmap_reply(body).map(Reply::RStat),
		COM => {
			if body.len() != 5 {
				return Err(Error::RecordInvalid);
			}
			Ok(Reply::Com(ComsetReply {
				address: body[0],
				baud_rate: u32_le(body, 1),
			}))
		}
		CCRYPT => {
			if body.len() != 32 {
				return Err(Error::RecordInvalid);
			}
			let mut pd_client_uid = [0u8; 8];
			let mut pd_random = [0u8; 8];
			let mut pd_cryptogram = [0u8; 16];
			pd_client_uid.copy_from_slice(&body[0..8]);
			pd_random.copy_from_slice(&body[8..16]);
			pd_cryptogram.copy_from_slice(&body[16..32]);
			Ok(Reply::Ccrypt {
				pd_client_uid,
				pd_random,
				pd_cryptogram,
			})
		}
		RMAC_I => {
			if body.len() != 16 {
				return Err(Error::RecordInvalid);
			}
			let mut rmac = [0u8; 16];
			rmac.copy_from_slice(body);
			Ok(Reply::RMacI(rmac))
		}
		FTSTAT => {
			if body.len() != 7 {
				return Err(Error::RecordInvalid);
			}
			Ok(Reply::FtStat(FileTransferStatusReply {
				status: body[0] as i8,
				offset: u32_le(body, 1),
				delay_ms: u16_le(body, 5),
			}))
		}
		RAW | FMT => {
			if body.len() < 4 {
				return Err(Error::RecordInvalid);
			}
			let length = u16_le(body, 2);
			let nbytes = if op == FMT {
				length as usize
			} else {
				((length as usize) + 7) / 8
			};
			if body.len() != 4 + nbytes || nbytes > CARD_DATA_MAX_LEN {
				return Err(Error::RecordInvalid);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[4..4 + nbytes]).map_err(|_| Error::RecordInvalid)?;
			Ok(Reply::CardRead {
				reader_no: body[0],
				format_is_ascii: op == FMT,
				length,
				data,
			})
		}
		KEYPPAD => {
			if body.len() < 2 {
				return Err(Error::RecordInvalid);
			}
			let length = body[1] as usize;
			if body.len() != 2 + length {
				return Err(Error::RecordInvalid);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[2..2 + length]).map_err(|_| Error::RecordInvalid)?;
			Ok(Reply::KeypadEvent { reader_no: body[0], data })
		}
		MFGREP => {
			if body.len() < 5 {
				return Err(Error::RecordInvalid);
			}
			let length = body[4] as usize;
			if body.len() != 5 + length || length > MFG_MAX_DATALEN {
				return Err(Error::RecordInvalid);
			}
			let mut data = Vec::new();
			data.extend_from_slice(&body[5..5 + length]).map_err(|_| Error::RecordInvalid)?;
			Ok(Reply::MfgRep(MfgCommand {
				vendor_code: [body[0], body[1], body[2]],
				command: body[3],
				data,
			}))
		}
		_ => Err(Error::CmdUnknown),
	}
}

fn bitmap_reply(body: &[u8]) -> Result<Vec<u8, 8>, Error> {
	if body.is_empty() || body.len() > 8 {
		return Err(Error::RecordInvalid);
	}
	let mut v = Vec::new();
	v.extend_from_slice(body).map_err(|_| Error::RecordInvalid)?;
	Ok(v)
}

/// Encodes a reply body given its variant. Returns the opcode and the
/// number of bytes written.
pub fn encode_reply(reply: &Reply, out: &mut [u8]) -> Result<(u8, usize), Error> {
	use opcode::*;
	let needed = |n: usize| -> Result<(), Error> {
		if out.len() < n {
			Err(Error::BufferTooSmall)
		} else {
			Ok(())
		}
	};
	match reply {
		Reply::Ack => Ok((ACK, 0)),
		Reply::Nak(code) => {
			needed(1)?;
			out[0] = *code as u8;
			Ok((NAK, 1))
		}
		Reply::PdId(id) => {
			needed(12)?;
			out[0..3].copy_from_slice(&id.vendor_oui);
			out[3] = id.model;
			out[4] = id.version;
			out[5..9].copy_from_slice(&id.serial);
			out[9..12].copy_from_slice(&id.firmware);
			Ok((PDID, 12))
		}
		Reply::PdCap(caps) => {
			needed(caps.len() * 3)?;
			for (i, cap) in caps.iter().enumerate() {
				out[i * 3] = cap.function_code;
				out[i * 3 + 1] = cap.compliance_level;
				out[i * 3 + 2] = cap.num_items;
			}
			Ok((PDCAP, caps.len() * 3))
		}
		Reply::LStat(s) => {
			needed(2)?;
			out[0] = s.tamper as u8;
			out[1] = s.power as u8;
			Ok((LSTATR, 2))
		}
		Reply::IStat(bits) => {
			needed(bits.len())?;
			out[..bits.len()].copy_from_slice(bits);
			Ok((ISTATR, bits.len()))
		}
		Reply::OStat(bits) => {
			needed(bits.len())?;
			out[..bits.len()].copy_from_slice(bits);
			Ok((OSTATR, bits.len()))
		}
		Reply::RStat(bits) => {
			needed(bits.len())?;
			out[..bits.len()].copy_from_slice(bits);
			Ok((RSTATR, bits.len()))
		}
		Reply::Com(c) => {
			needed(5)?;
			out[0] = c.address;
			write_u32_le(out, 1, c.baud_rate);
			Ok((COM, 5))
		}
		Reply::Ccrypt {
			pd_client_uid,
			pd_random,
			pd_cryptogram,
		} => {
			needed(32)?;
			out[0..8].copy_from_slice(pd_client_uid);
			out[8..16].copy_from_slice(pd_random);
			out[16..32].copy_from_slice(pd_cryptogram);
			Ok((CCRYPT, 32))
		}
		Reply::RMacI(m) => {
			needed(16)?;
			out[..16].copy_from_slice(m);
			Ok((RMAC_I, 16))
		}
		Reply::FtStat(s) => {
			needed(7)?;
			out[0] = s.status as u8;
			write_u32_le(out, 1, s.offset);
			write_u16_le(out, 5, s.delay_ms);
			Ok((FTSTAT, 7))
		}
		Reply::CardRead {
			reader_no,
			format_is_ascii,
			length,
			data,
		} => {
			needed(4 + data.len())?;
			out[0] = *reader_no;
			out[1] = 0;
			write_u16_le(out, 2, *length);
			out[4..4 + data.len()].copy_from_slice(data);
			Ok((if *format_is_ascii { FMT } else { RAW }, 4 + data.len()))
		}
		Reply::KeypadEvent { reader_no, data } => {
			needed(2 + data.len())?;
			out[0] = *reader_no;
			out[1] = data.len() as u8;
			out[2..2 + data.len()].copy_from_slice(data);
			Ok((KEYPPAD, 2 + data.len()))
		}
		Reply::MfgRep(c) => {
			needed(5 + c.data.len())?;
			out[0..3].copy_from_slice(&c.vendor_code);
			out[3] = c.command;
			out[4] = c.data.len() as u8;
			out[5..5 + c.data.len()].copy_from_slice(&c.data);
			Ok((MFGREP, 5 + c.data.len()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn poll_round_trips() {
		let mut buf = [0u8; 8];
		let (op, n) = encode_command(&Command::Poll, &mut buf).unwrap();
		assert_eq!(decode_command(op, &buf[..n]).unwrap(), Command::Poll);
	}

	#[test]
	fn output_command_round_trips() {
		let cmd = Command::Out(OutputCommand {
			output_no: 1,
			control_code: 2,
			timer_count: 300,
		});
		let mut buf = [0u8; 8];
		let (op, n) = encode_command(&cmd, &mut buf).unwrap();
		assert_eq!(decode_command(op, &buf[..n]).unwrap(), cmd);
	}

	#[test]
	fn text_command_round_trips() {
		let mut data = Vec::new();
		data.extend_from_slice(b"hello").unwrap();
		let cmd = Command::Text(TextCommand {
			reader: 0,
			control_code: 1,
			temp_time: 5,
			offset_row: 1,
			offset_col: 1,
			data,
		});
		let mut buf = [0u8; 32];
		let (op, n) = encode_command(&cmd, &mut buf).unwrap();
		assert_eq!(decode_command(op, &buf[..n]).unwrap(), cmd);
	}

	#[test]
	fn wrong_length_output_command_is_nak_record() {
		assert_eq!(decode_command(opcode::OUT, &[0u8; 3]), Err(NakCode::CmdLen));
	}

	#[test]
	fn unknown_opcode_is_nak_cmd_unknown() {
		assert_eq!(decode_command(0xEE, &[]), Err(NakCode::CmdUnknown));
	}

	#[test]
	fn keyset_rejects_non_scbk_type() {
		let body = [0x02u8, 0x01, 0xAA];
		assert_eq!(decode_command(opcode::KEYSET, &body), Err(NakCode::Record));
	}

	#[test]
	fn pd_id_reply_round_trips() {
		let id = PdIdReply {
			vendor_oui: [0xA1, 0xB2, 0xC3],
			model: 0x01,
			version: 0x02,
			serial: [0x78, 0x56, 0x34, 0x12],
			firmware: [0x03, 0x02, 0x01],
		};
		let mut buf = [0u8; 16];
		let (op, n) = encode_reply(&Reply::PdId(id), &mut buf).unwrap();
		assert_eq!(decode_reply(op, &buf[..n]).unwrap(), Reply::PdId(id));
	}

	#[test]
	fn nak_reply_round_trips() {
		let mut buf = [0u8; 4];
		let (op, n) = encode_reply(&Reply::Nak(NakCode::ScCondition), &mut buf).unwrap();
		assert_eq!(decode_reply(op, &buf[..n]).unwrap(), Reply::Nak(NakCode::ScCondition));
	}

	#[test]
	fn raw_card_read_length_is_interpreted_in_bits() {
		let mut data = Vec::new();
		data.extend_from_slice(&[0xFF, 0xFF, 0xFF]).unwrap();
		let reply = Reply::CardRead {
			reader_no: 0,
			format_is_ascii: false,
			length: 24,
			data,
		};
		let mut buf = [0u8; 16];
		let (op, n) = encode_reply(&reply, &mut buf).unwrap();
		assert_eq!(decode_reply(op, &buf[..n]).unwrap(), reply);
	}
}
