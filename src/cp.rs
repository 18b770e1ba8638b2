//! C7: CP role state machine (spec §4.7).
//!
//! One [`Cp`] drives a single attached PD through
//! `init -> id_req -> cap_req -> (sc_init -> sc_chlng -> sc_scrypt ->) online -> offline`
//! with retries and a back-off before reattempting a handshake. A host
//! managing several PDs instantiates one `Cp` per device; devices sharing a
//! physical bus are still disambiguated by [`crate::channel::ChannelId`], so
//! the host is responsible for not driving two `Cp`s whose PDs share a
//! channel id in the same tick (spec §5: "the CP serializes transactions so
//! at most one PD has an outstanding command on a given channel-id").

use heapless::Vec;

use crate::catalogue::{self, Command, Reply};
use crate::channel::Channel;
use crate::config::{FILE_FRAGMENT_MAX, OFFLINE_TIMEOUT_MS, RESPONSE_TIMEOUT_MS};
use crate::crypto::{BlockCipher, RandomSource};
use crate::error::Error;
use crate::file_transfer::{self, FileOps};
use crate::logging::{osdp_debug, osdp_warn, Logger};
use crate::packet::{self, Control, ParseOutcome, Role as WireRole, ScbType, SecureBlock};
use crate::pd_model::{FileTransferState, PdFlags, PdRecord};
use crate::secure_channel;

/// Application-supplied event handler (spec §6 "CP event callback").
pub trait CpEventHandler {
	fn on_event(&mut self, event: &Reply);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Init,
	IdReq,
	CapReq,
	ScInit,
	ScChlng,
	ScScrypt,
	Online,
	Offline,
}

/// One outstanding command/sequence pairing, so a reply can be matched back
/// to what was actually sent (spec §5 "replies are matched to the most
/// recent outstanding command by sequence number and reply id").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outstanding {
	opcode: u8,
	sequence: u8,
	sent_at_ms: u64,
	retries_used: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
	pub soft_discards: u32,
	pub unsolicited_replies: u32,
	pub timeouts: u32,
	pub offline_transitions: u32,
}

/// A CP-role protocol instance managing one attached PD.
pub struct Cp<C, B, R, F, H, const N_CMD: usize, const N_EVT: usize> {
	pub record: PdRecord<Command, Reply, N_CMD, N_EVT>,
	channel: C,
	cipher: B,
	rng: R,
	file_ops: F,
	handler: H,
	logger: Logger,
	state: State,
	outstanding: Option<Outstanding>,
	now_ms: u64,
	last_poll_sent_ms: u64,
	pub counters: Counters,
	tx_scratch: [u8; crate::config::RX_BUF_SIZE],
	tx_len: usize,
}

impl<C, B, R, F, H, const N_CMD: usize, const N_EVT: usize> Cp<C, B, R, F, H, N_CMD, N_EVT>
where
	C: Channel,
	B: BlockCipher,
	R: RandomSource,
	F: FileOps,
	H: CpEventHandler,
{
	pub fn new(address: u8, baud_rate: u32, channel: C, cipher: B, rng: R, file_ops: F, handler: H) -> Self {
		let mut record = PdRecord::new(address, baud_rate);
		record.flags.remove(PdFlags::PD_ROLE);
		Self {
			record,
			channel,
			cipher,
			rng,
			file_ops,
			handler,
			logger: Logger::default(),
			state: State::Init,
			outstanding: None,
			now_ms: 0,
			last_poll_sent_ms: 0,
			counters: Counters::default(),
			tx_scratch: [0u8; crate::config::RX_BUF_SIZE],
			tx_len: 0,
		}
	}

	/// Opens `file_id` on the backing store and starts pushing it to the PD
	/// as a background overlay over the ordinary command/poll cycle (spec
	/// §4.8). The CP is always the sending side; the PD receives and writes.
	pub fn start_file_transfer(&mut self, file_id: u8) -> Result<(), Error> {
		self.record.file_transfer = file_transfer::start_send(&mut self.file_ops, file_id)?;
		Ok(())
	}

	/// Aborts an in-progress file transfer (spec §4.8 "a cancel flag ...
	/// aborts mid-stream"). The cancel flag rides on the next
	/// `FILETRANSFER` fragment sent to the PD.
	pub fn cancel_file_transfer(&mut self) -> Result<(), Error> {
		file_transfer::cancel(&mut self.record.file_transfer, &mut self.file_ops)
	}

	/// Current progress of the in-flight (or most recently completed) file
	/// transfer.
	pub fn file_transfer_status(&self) -> FileTransferState {
		self.record.file_transfer
	}

	/// Sets `enforce-secure`: `online` additionally requires `secure-active`
	/// (spec §4.7).
	pub fn set_enforce_secure(&mut self, enforce: bool) {
		self.record.flags.set(PdFlags::ENFORCE_SECURE, enforce);
	}

	/// Downgrades unsolicited replies (opcode mismatch with the outstanding
	/// command) from fatal to a single dropped reply (spec §9 Open
	/// Question, `ign_unsolicited`).
	pub fn set_ignore_unsolicited(&mut self, ignore: bool) {
		self.record.flags.set(PdFlags::IGN_UNSOLICITED, ignore);
	}

	/// Queues an application command for this PD (spec §6 "enqueue command
	/// (CP)").
	pub fn enqueue_command(&mut self, cmd: Command) -> Result<(), Error> {
		self.record.command_queue.push(cmd)
	}

	#[cfg(test)]
	pub(crate) fn channel_mut(&mut self) -> &mut C {
		&mut self.channel
	}

	#[cfg(test)]
	pub(crate) fn handler_mut(&mut self) -> &mut H {
		&mut self.handler
	}

	/// True once the handshake has completed and (if `enforce-secure`) the
	/// secure channel is active (spec §3 invariant 5).
	pub fn is_online(&self) -> bool {
		self.state == State::Online
	}

	/// One non-blocking protocol step, driven by a host tick carrying the
	/// current monotonic time in milliseconds (spec §5, `refresh >= 20 Hz`).
	pub fn refresh(&mut self, now_ms: u64) -> Result<(), Error> {
		self.now_ms = now_ms;

		if let Some(outstanding) = self.outstanding {
			if now_ms.saturating_sub(outstanding.sent_at_ms) > RESPONSE_TIMEOUT_MS {
				self.counters.timeouts += 1;
				if outstanding.retries_used < crate::config::CP_MAX_RETRIES {
					osdp_warn!(self.logger, "response timeout, opcode 0x{:02X}, retrying", outstanding.opcode);
					self.channel.send(&self.tx_scratch[..self.tx_len])?;
					self.outstanding = Some(Outstanding {
						sent_at_ms: now_ms,
						retries_used: outstanding.retries_used + 1,
						..outstanding
					});
					return Ok(());
				}
				osdp_warn!(self.logger, "response timeout, opcode 0x{:02X}, giving up", outstanding.opcode);
				self.outstanding = None;
				self.go_offline();
				return Ok(());
			}
			return self.poll_for_reply();
		}

		match self.state {
			State::Init => self.send_command(Command::Id),
			State::IdReq => self.send_command(Command::Id),
			State::CapReq => self.send_command(Command::Cap),
			State::ScInit | State::ScChlng => self.start_handshake(),
			State::ScScrypt => self.send_scrypt(),
			State::Online => self.online_tick(),
			State::Offline => self.offline_tick(),
		}
	}

	fn go_offline(&mut self) {
		if self.state != State::Offline {
			self.counters.offline_transitions += 1;
		}
		self.record.flags.remove(PdFlags::ONLINE);
		self.record.reset_session();
		self.state = State::Offline;
	}

	fn offline_tick(&mut self) -> Result<(), Error> {
		if self.now_ms.saturating_sub(self.record.last_activity_ms) > OFFLINE_TIMEOUT_MS {
			self.record.last_activity_ms = self.now_ms;
			self.state = State::Init;
		}
		Ok(())
	}

	fn online_tick(&mut self) -> Result<(), Error> {
		if let Some(cmd) = self.record.command_queue.pop() {
			return self.send_command(cmd);
		}
		if self.record.file_transfer.active && !self.record.file_transfer.done() {
			return self.send_file_transfer_chunk();
		}
		if self.now_ms.saturating_sub(self.last_poll_sent_ms) >= crate::config::POLL_INTERVAL_MS {
			return self.send_command(Command::Poll);
		}
		Ok(())
	}

	/// Reads the next fragment off the backing store and sends it as a
	/// `FILETRANSFER` command (spec §4.8: "the engine itself reads
	/// `chunk = min(mtu_payload, remaining)` ... and sends it"). Queued
	/// application commands take priority over transfer fragments, and
	/// transfer fragments take priority over idle polling, so a transfer
	/// never suppresses a host-issued command but still makes progress on
	/// every tick once queued work drains.
	fn send_file_transfer_chunk(&mut self) -> Result<(), Error> {
		let mut chunk = [0u8; FILE_FRAGMENT_MAX];
		let n = file_transfer::read_next_chunk(&self.record.file_transfer, &mut self.file_ops, &mut chunk)?;
		let mut data: Vec<u8, FILE_FRAGMENT_MAX> = Vec::new();
		data.extend_from_slice(&chunk[..n]).map_err(|_| Error::BufferTooSmall)?;
		let cmd = Command::FileTransfer(catalogue::FileTransferCommand {
			file_id: self.record.file_transfer.file_id,
			total_size: self.record.file_transfer.total_size,
			offset: self.record.file_transfer.offset,
			cancel: self.record.file_transfer.cancelled,
			data,
		});
		self.send_command(cmd)
	}

	fn start_handshake(&mut self) -> Result<(), Error> {
		let cp_random = secure_channel::generate_random(&mut self.rng);
		self.record.session.cp_random = cp_random;
		self.state = State::ScChlng;
		self.send_command(Command::Chlng(cp_random))
	}

	fn send_scrypt(&mut self) -> Result<(), Error> {
		let cp_cryptogram = secure_channel::compute_cp_cryptogram(
			&self.cipher,
			&self.record.session.s_enc,
			&self.record.session.cp_random,
			&self.record.session.pd_random,
		);
		self.record.session.cp_cryptogram = cp_cryptogram;
		self.send_command(Command::Scrypt(cp_cryptogram))
	}

	fn send_command(&mut self, cmd: Command) -> Result<(), Error> {
		let mut body = [0u8; crate::config::RX_BUF_SIZE];
		let (op, body_len) = catalogue::encode_command(&cmd, &mut body)?;

		let secure = self.record.flags.contains(PdFlags::SECURE_ACTIVE);
		let (scb, out_len) = if secure {
			// The MAC covers the real frame header (OSDP's actual design),
			// so both ends must derive the identical address byte that
			// ends up on the wire rather than a sentinel each side invents.
			let header = [self.record.address & 0x7F];
			let mut wrapped = [0u8; crate::config::RX_BUF_SIZE];
			let n = secure_channel::wrap(
				&self.cipher,
				&self.record.session.s_enc,
				&self.record.session.s_mac1,
				&self.record.session.s_mac2,
				&mut self.record.session.c_mac,
				&header,
				&body[..body_len],
				&mut wrapped,
			)?;
			body[..n].copy_from_slice(&wrapped[..n]);
			(
				Some(SecureBlock {
					scb_type: ScbType::DataEncryptedMac,
					extra: 0,
				}),
				n,
			)
		} else {
			(None, body_len)
		};

		let sequence = self.record.sequence;
		let control = Control {
			sequence,
			use_crc: true,
			has_scb: scb.is_some(),
		};
		let n = packet::build(WireRole::ControlPanel, self.record.address, control, scb, &body[..out_len], &mut self.tx_scratch)?;
		self.channel.send(&self.tx_scratch[..n])?;
		self.tx_len = n;

		self.outstanding = Some(Outstanding {
			opcode: op,
			sequence,
			sent_at_ms: self.now_ms,
			retries_used: 0,
		});
		if op == catalogue::opcode::POLL {
			self.last_poll_sent_ms = self.now_ms;
		}
		Ok(())
	}

	fn poll_for_reply(&mut self) -> Result<(), Error> {
		let buf_len = self.record.rx_len;
		let n = self.channel.recv(&mut self.record.rx_buf[buf_len..])?;
		self.record.rx_len += n;
		if self.record.rx_len == 0 {
			return Ok(());
		}

		match packet::parse(&self.record.rx_buf[..self.record.rx_len], self.record.address) {
			ParseOutcome::NeedMore => Ok(()),
			ParseOutcome::SoftDiscard { consumed } => {
				self.counters.soft_discards += 1;
				self.consume(consumed);
				Ok(())
			}
			ParseOutcome::Malformed => {
				self.channel.flush()?;
				self.record.rx_len = 0;
				Ok(())
			}
			ParseOutcome::Complete {
				consumed,
				header,
				scb,
				payload_start,
				payload_len,
			} => {
				let result = self.handle_reply(header.control, scb, payload_start, payload_len);
				self.consume(consumed);
				result
			}
		}
	}

	fn consume(&mut self, consumed: usize) {
		self.record.rx_buf.copy_within(consumed..self.record.rx_len, 0);
		self.record.rx_len -= consumed;
	}

	fn handle_reply(&mut self, control: Control, scb: Option<SecureBlock>, payload_start: usize, payload_len: usize) -> Result<(), Error> {
		let Some(outstanding) = self.outstanding else {
			return Ok(());
		};
		if control.sequence != outstanding.sequence {
			self.counters.unsolicited_replies += 1;
			return Ok(());
		}

		let mut body_buf = [0u8; crate::config::RX_BUF_SIZE];
		let body_len = match scb {
			Some(SecureBlock {
				scb_type: ScbType::DataMacOnly | ScbType::DataEncryptedMac,
				..
			}) => {
				let mut ciphertext = [0u8; crate::config::RX_BUF_SIZE];
				ciphertext[..payload_len].copy_from_slice(&self.record.rx_buf[payload_start..payload_start + payload_len]);
				// Replies are PD->CP frames, whose address byte carries the
				// reply bit (0x80) on the wire (packet::build's Role::Peripheral).
				let header = [(self.record.address & 0x7F) | 0x80];
				match secure_channel::unwrap(
					&self.cipher,
					&self.record.session.s_enc,
					&self.record.session.s_mac1,
					&self.record.session.s_mac2,
					&mut self.record.session.c_mac,
					&header,
					&ciphertext[..payload_len],
					&mut body_buf,
				) {
					Ok(n) => n,
					Err(e) => {
						self.go_offline();
						return Err(e);
					}
				}
			}
			_ => {
				if payload_len > 0 {
					body_buf[..payload_len].copy_from_slice(&self.record.rx_buf[payload_start..payload_start + payload_len]);
				}
				payload_len
			}
		};

		if body_len == 0 {
			return Ok(());
		}
		let op = body_buf[0];
		let body = &body_buf[1..body_len];

		self.outstanding = None;
		self.record.last_activity_ms = self.now_ms;
		self.record.flags.insert(PdFlags::ONLINE);
		self.record.advance_sequence();

		if !outstanding.reply_is_valid(op) && !self.record.flags.contains(PdFlags::IGN_UNSOLICITED) {
			osdp_warn!(self.logger, "unsolicited reply 0x{:02X} for command 0x{:02X}", op, outstanding.opcode);
			self.counters.unsolicited_replies += 1;
			self.go_offline();
			return Ok(());
		}

		self.route_reply(outstanding.opcode, op, body)
	}

	fn route_reply(&mut self, cmd_opcode: u8, reply_opcode: u8, body: &[u8]) -> Result<(), Error> {
		let reply = match catalogue::decode_reply(reply_opcode, body) {
			Ok(reply) => reply,
			Err(_) => {
				self.go_offline();
				return Ok(());
			}
		};

		match (self.state, cmd_opcode, &reply) {
			(_, _, Reply::Nak(code)) if cmd_opcode == catalogue::opcode::SCRYPT => {
				osdp_debug!(self.logger, "secure handshake rejected: {:?}", code);
				self.record.reset_session();
				self.go_offline();
			}
			(State::Init | State::IdReq, catalogue::opcode::ID, Reply::PdId(id)) => {
				self.record.info.vendor_oui = id.vendor_oui;
				self.record.info.model = id.model;
				self.record.info.version = id.version;
				self.record.info.serial = id.serial;
				self.record.info.firmware = id.firmware;
				self.state = State::CapReq;
			}
			(State::CapReq, catalogue::opcode::CAP, Reply::PdCap(caps)) => {
				for cap in caps {
					self.record.set_capability(*cap);
				}
				self.state = State::ScInit;
			}
			(State::ScChlng, catalogue::opcode::CHLNG, Reply::Ccrypt { pd_random, pd_cryptogram, .. }) => {
				self.record.session.pd_random = *pd_random;
				let (s_enc, s_mac1, s_mac2) =
					secure_channel::derive_session_keys(&self.cipher, &self.record.scbk, &self.record.session.cp_random);
				self.record.session.s_enc = s_enc;
				self.record.session.s_mac1 = s_mac1;
				self.record.session.s_mac2 = s_mac2;

				let expected = secure_channel::compute_pd_cryptogram(&self.cipher, &s_enc, &self.record.session.cp_random, pd_random);
				if !secure_channel::verify_equal(&expected, pd_cryptogram) {
					osdp_warn!(self.logger, "PD cryptogram mismatch");
					self.record.reset_session();
					self.go_offline();
					return Ok(());
				}
				self.record.session.pd_cryptogram = *pd_cryptogram;
				self.state = State::ScScrypt;
			}
			(State::ScScrypt, catalogue::opcode::SCRYPT, Reply::RMacI(r_mac)) => {
				// Both sides' running MAC chains start from the one
				// cryptogram-derived IV the PD reports here (spec §4.4:
				// "seeded by a cryptogram-derived IV", singular) — not a
				// second, CP-computed seed, or the chains diverge on the
				// very first secure packet.
				self.record.session.r_mac = *r_mac;
				self.record.session.c_mac = *r_mac;
				self.record.flags.insert(PdFlags::SECURE_ACTIVE);
				self.state = State::Online;
			}
			(_, catalogue::opcode::FILETRANSFER, Reply::FtStat(status)) => {
				self.record.file_transfer.offset = status.offset;
				if status.status == catalogue::file_tx_status::ABORT {
					self.record.file_transfer.cancelled = true;
				}
				if self.record.file_transfer.done() {
					let _ = file_transfer::finish(&mut self.file_ops);
				}
			}
			(_, catalogue::opcode::POLL, Reply::Ack) => {}
			(_, _, Reply::Ack) => {}
			(_, _, other) => self.handler.on_event(other),
		}

		if self.state == State::ScInit {
			let supports_sc = self.record.capability(crate::pd_model::CAP_COMMUNICATION_SECURITY).is_some();
			if !supports_sc {
				if self.record.flags.contains(PdFlags::ENFORCE_SECURE) {
					osdp_warn!(self.logger, "enforce-secure set but PD has no communication-security capability");
					self.go_offline();
				} else {
					self.state = State::Online;
				}
			}
		}

		Ok(())
	}
}

impl Outstanding {
	/// The reply opcode this outstanding command expects (spec §5: replies
	/// matched "by sequence number and reply id").
	fn opcode_expected_reply(&self) -> u8 {
		use catalogue::opcode;
		match self.opcode {
			opcode::ID => opcode::PDID,
			opcode::CAP => opcode::PDCAP,
			opcode::LSTAT => opcode::LSTATR,
			opcode::ISTAT => opcode::ISTATR,
			opcode::OSTAT => opcode::OSTATR,
			opcode::RSTAT => opcode::RSTATR,
			opcode::COMSET => opcode::COM,
			opcode::CHLNG => opcode::CCRYPT,
			opcode::SCRYPT => opcode::RMAC_I,
			opcode::FILETRANSFER => opcode::FTSTAT,
			opcode::MFG => opcode::MFGREP,
			_ => opcode::ACK,
		}
	}

	/// Whether `op` is an acceptable reply to this outstanding command.
	///
	/// POLL has no single expected reply opcode: the PD may answer it with
	/// a plain ACK, or opportunistically piggyback a pending card/keypad
	/// event or status reply instead (spec §4.5, §6 CP event callback). Any
	/// other command still requires its exact matching reply id.
	fn reply_is_valid(&self, op: u8) -> bool {
		use catalogue::opcode;
		if self.opcode == opcode::POLL {
			return matches!(
				op,
				opcode::ACK | opcode::RAW | opcode::FMT | opcode::KEYPPAD | opcode::LSTATR | opcode::ISTATR | opcode::OSTATR | opcode::RSTATR
			);
		}
		op == self.opcode_expected_reply()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::test_support::LoopbackChannel;
	use crate::crypto::test_support::{SoftwareAes, TestRng};
	use crate::file_transfer::test_support::MemoryFile;

	struct NullHandler;
	impl CpEventHandler for NullHandler {
		fn on_event(&mut self, _event: &Reply) {}
	}

	fn make_cp() -> Cp<LoopbackChannel, SoftwareAes, TestRng, MemoryFile, NullHandler, 4, 4> {
		Cp::new(
			0,
			9600,
			LoopbackChannel::new(1),
			SoftwareAes,
			TestRng::seeded(1),
			MemoryFile::empty_of_size(0),
			NullHandler,
		)
	}

	#[test]
	fn init_state_sends_id_request() {
		let mut cp = make_cp();
		cp.refresh(0).unwrap();
		let sent = cp.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete { payload_start, .. } => {
				assert_eq!(sent[payload_start], catalogue::opcode::ID);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn timeout_retries_once_before_going_offline() {
		let mut cp = make_cp();
		cp.refresh(0).unwrap();
		cp.channel.drain_sent();

		cp.refresh(RESPONSE_TIMEOUT_MS + 1).unwrap();
		assert_eq!(cp.counters.timeouts, 1);
		assert!(cp.outstanding.is_some());
		assert_eq!(cp.channel.drain_sent().as_slice(), {
			// the retransmit is byte-identical to the original ID request
			let mut frame = [0u8; 16];
			let control = Control {
				sequence: 0,
				use_crc: true,
				has_scb: false,
			};
			let n = packet::build(WireRole::ControlPanel, 0, control, None, &[catalogue::opcode::ID, 0x00], &mut frame).unwrap();
			&frame[..n]
		});

		cp.refresh(2 * (RESPONSE_TIMEOUT_MS + 1)).unwrap();
		assert_eq!(cp.counters.timeouts, 2);
		assert!(cp.outstanding.is_none());
		assert!(!cp.is_online());
	}

	#[test]
	fn id_reply_advances_to_cap_request() {
		let mut cp = make_cp();
		cp.refresh(0).unwrap();
		cp.channel.drain_sent();

		let id = catalogue::PdIdReply {
			vendor_oui: [0xA1, 0xB2, 0xC3],
			model: 1,
			version: 2,
			serial: [0x78, 0x56, 0x34, 0x12],
			firmware: [3, 2, 1],
		};
		let mut body = [0u8; 16];
		let (_, n) = catalogue::encode_reply(&catalogue::Reply::PdId(id), &mut body).unwrap();
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let mut payload = [0u8; 16];
		payload[0] = catalogue::opcode::PDID;
		payload[1..1 + n].copy_from_slice(&body[..n]);
		let mut frame = [0u8; 32];
		let framed = packet::build(WireRole::Peripheral, 0, control, None, &payload[..1 + n], &mut frame).unwrap();
		cp.channel.deliver(&frame[..framed]);

		cp.refresh(1).unwrap();
		assert_eq!(cp.state, State::CapReq);
		assert_eq!(cp.record.info.vendor_oui, [0xA1, 0xB2, 0xC3]);
	}
}
