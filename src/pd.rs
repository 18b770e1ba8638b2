//! C6: PD role state machine (spec §4.6).
//!
//! States: `idle -> send_reply -> idle`, with a transient `err` path that
//! resets RX and clears `secure-active`. Grounded on
//! `original_source/src/osdp_pd.c`'s `pd_decode_command`/`pd_build_reply`
//! pair — this module keeps that decode-dispatch-encode shape, generalized
//! to the full catalogue and the secure-channel wrap/unwrap layer C4 adds.

use crate::catalogue::{self, Command, MfgCommand, Reply};
use crate::channel::Channel;
use crate::config::RX_BUF_SIZE;
use crate::crypto::{BlockCipher, RandomSource};
use crate::error::{Error, NakCode};
use crate::file_transfer::{self, FileOps};
use crate::logging::{osdp_debug, osdp_warn, Logger};
use crate::packet::{self, Control, ParseOutcome, Role as WireRole, ScbType, SecureBlock};
use crate::pd_model::{PdFlags, PdRecord};
use crate::secure_channel::{self, SessionKeys};

/// What the application wants done with a decoded command (spec §6 "PD
/// command callback").
pub enum CommandOutcome {
	Ack,
	Nak(NakCode),
	MfgReply(MfgCommand),
}

/// Application-supplied command handler (spec §6).
pub trait PdCommandHandler {
	fn on_command(&mut self, cmd: &Command) -> CommandOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Idle,
	SendReply,
	Err,
}

/// Telemetry counters a host application can inspect (spec §9: soft
/// discards surfaced as a counter rather than silently swallowed).
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
	pub soft_discards: u32,
	pub frame_errors: u32,
}

/// A PD-role protocol instance. Owns one [`PdRecord`] (itself, from the
/// device's point of view), the transport, and the external crypto/file
/// collaborators.
pub struct Pd<C, B, R, F, H, const N_CMD: usize, const N_EVT: usize> {
	pub record: PdRecord<Command, Reply, N_CMD, N_EVT>,
	channel: C,
	cipher: B,
	rng: R,
	pub file_ops: F,
	handler: H,
	logger: Logger,
	state: State,
	pub counters: Counters,
	reply_scratch: [u8; RX_BUF_SIZE],
	reply_len: usize,
	last_reply: [u8; RX_BUF_SIZE],
	last_reply_len: usize,
	last_reply_sequence: Option<u8>,
}

impl<C, B, R, F, H, const N_CMD: usize, const N_EVT: usize> Pd<C, B, R, F, H, N_CMD, N_EVT>
where
	C: Channel,
	B: BlockCipher,
	R: RandomSource,
	F: FileOps,
	H: PdCommandHandler,
{
	pub fn new(address: u8, baud_rate: u32, scbk: Option<[u8; 16]>, channel: C, cipher: B, rng: R, file_ops: F, handler: H) -> Self {
		let mut record = PdRecord::new(address, baud_rate);
		record.flags.insert(PdFlags::PD_ROLE);
		match scbk {
			Some(key) => record.scbk = key,
			None => {
				record.scbk = secure_channel::SCBK_DEFAULT;
				record.flags.insert(PdFlags::INSTALL_MODE);
			}
		}
		Self {
			record,
			channel,
			cipher,
			rng,
			file_ops,
			handler,
			logger: Logger::default(),
			state: State::Idle,
			counters: Counters::default(),
			reply_scratch: [0u8; RX_BUF_SIZE],
			reply_len: 0,
			last_reply: [0u8; RX_BUF_SIZE],
			last_reply_len: 0,
			last_reply_sequence: None,
		}
	}

	/// Queues an event (card read, keypad, status change) to be reported on
	/// the next POLL this PD answers (spec §4.5: replies carry events
	/// opportunistically rather than pushing them unsolicited).
	pub fn notify_event(&mut self, event: Reply) -> Result<(), Error> {
		self.record.event_queue.push(event)
	}

	#[cfg(test)]
	pub(crate) fn channel_mut(&mut self) -> &mut C {
		&mut self.channel
	}

	/// One non-blocking protocol step: at most one `recv`, one parse
	/// attempt, and (if a reply is pending) one `send` (spec §5
	/// "`refresh` returns immediately after one attempt to progress").
	pub fn refresh(&mut self) -> Result<(), Error> {
		match self.state {
			State::Idle => self.poll_idle(),
			State::SendReply => self.send_pending_reply(),
			State::Err => {
				self.record.reset_session();
				self.record.rx_len = 0;
				self.state = State::Idle;
				Ok(())
			}
		}
	}

	fn poll_idle(&mut self) -> Result<(), Error> {
		let buf_len = self.record.rx_len;
		let n = self.channel.recv(&mut self.record.rx_buf[buf_len..])?;
		self.record.rx_len += n;
		if self.record.rx_len == 0 {
			return Ok(());
		}

		let outcome = packet::parse(&self.record.rx_buf[..self.record.rx_len], self.record.address);
		match outcome {
			ParseOutcome::NeedMore => Ok(()),
			ParseOutcome::SoftDiscard { consumed } => {
				self.counters.soft_discards += 1;
				self.consume(consumed);
				Ok(())
			}
			ParseOutcome::Malformed => {
				self.counters.frame_errors += 1;
				osdp_warn!(self.logger, "malformed frame, resetting RX");
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
				let result = self.handle_frame(header.control, scb, payload_start, payload_len);
				self.consume(consumed);
				result
			}
		}
	}

	fn consume(&mut self, consumed: usize) {
		self.record.rx_buf.copy_within(consumed..self.record.rx_len, 0);
		self.record.rx_len -= consumed;
	}

	fn handle_frame(&mut self, control: Control, scb: Option<SecureBlock>, payload_start: usize, payload_len: usize) -> Result<(), Error> {
		// A command bearing the sequence number this PD most recently
		// replied to (not the one it now expects) is the CP retransmitting
		// because our last reply never arrived — resend the cached bytes
		// verbatim rather than reprocessing the command a second time
		// (spec §8 testable property: "both ends converge to a matching
		// sequence number within one retry cycle").
		if self.last_reply_sequence == Some(control.sequence) && control.sequence != self.record.sequence {
			self.reply_scratch[..self.last_reply_len].copy_from_slice(&self.last_reply[..self.last_reply_len]);
			self.reply_len = self.last_reply_len;
			self.state = State::SendReply;
			return Ok(());
		}

		if control.sequence != self.record.sequence && control.sequence != 0 {
			self.build_reply(&Reply::Nak(NakCode::SeqNum), control.sequence, None)?;
			return Ok(());
		}

		let mut body_buf = [0u8; RX_BUF_SIZE];
		let body_len = match scb {
			Some(SecureBlock {
				scb_type: ScbType::DataMacOnly | ScbType::DataEncryptedMac,
				..
			}) => {
				if !self.record.flags.contains(PdFlags::SECURE_ACTIVE) {
					self.build_reply(&Reply::Nak(NakCode::ScCondition), control.sequence, None)?;
					return Ok(());
				}
				let mut ciphertext = [0u8; RX_BUF_SIZE];
				ciphertext[..payload_len].copy_from_slice(&self.record.rx_buf[payload_start..payload_start + payload_len]);
				// Commands are CP->PD frames, address byte with the reply
				// bit clear (packet::build's Role::ControlPanel) — must
				// match what the CP fed into the same MAC on send.
				let header = [self.record.address & 0x7F];
				match secure_channel::unwrap(
					&self.cipher,
					&self.record.session.s_enc,
					&self.record.session.s_mac1,
					&self.record.session.s_mac2,
					&mut self.record.session.r_mac,
					&header,
					&ciphertext[..payload_len],
					&mut body_buf,
				) {
					Ok(n) => n,
					Err(_) => {
						self.record.reset_session();
						self.build_reply(&Reply::Nak(NakCode::ScCondition), control.sequence, None)?;
						return Ok(());
					}
				}
			}
			Some(_) => {
				if payload_len == 0 {
					0
				} else {
					body_buf[..payload_len].copy_from_slice(&self.record.rx_buf[payload_start..payload_start + payload_len]);
					payload_len
				}
			}
			None => {
				if self.record.flags.contains(PdFlags::SECURE_ACTIVE) {
					self.build_reply(&Reply::Nak(NakCode::ScCondition), control.sequence, None)?;
					return Ok(());
				}
				body_buf[..payload_len].copy_from_slice(&self.record.rx_buf[payload_start..payload_start + payload_len]);
				payload_len
			}
		};

		if body_len == 0 {
			return self.build_reply(&Reply::Nak(NakCode::Record), control.sequence, None);
		}
		let op = body_buf[0];
		let body = &body_buf[1..body_len];
		self.dispatch(op, body, control.sequence)
	}

	fn dispatch(&mut self, op: u8, body: &[u8], sequence: u8) -> Result<(), Error> {
		match op {
			catalogue::opcode::CHLNG => self.handle_chlng(body, sequence),
			catalogue::opcode::SCRYPT => self.handle_scrypt(body, sequence),
			catalogue::opcode::KEYSET => self.handle_keyset(body, sequence),
			catalogue::opcode::FILETRANSFER => self.handle_file_transfer(body, sequence),
			_ => self.handle_ordinary_command(op, body, sequence),
		}
	}

	fn handle_chlng(&mut self, body: &[u8], sequence: u8) -> Result<(), Error> {
		if self.record.capability(crate::pd_model::CAP_COMMUNICATION_SECURITY).is_none() {
			return self.build_reply(&Reply::Nak(NakCode::ScUnsupported), sequence, None);
		}
		self.record.reset_session();
		if body.len() != 8 {
			return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None);
		}
		let mut cp_random = [0u8; 8];
		cp_random.copy_from_slice(body);
		self.record.session.cp_random = cp_random;

		let pd_random = secure_channel::generate_random(&mut self.rng);
		self.record.session.pd_random = pd_random;

		let (s_enc, s_mac1, s_mac2) = secure_channel::derive_session_keys(&self.cipher, &self.record.scbk, &cp_random);
		self.record.session.s_enc = s_enc;
		self.record.session.s_mac1 = s_mac1;
		self.record.session.s_mac2 = s_mac2;

		let pd_cryptogram = secure_channel::compute_pd_cryptogram(&self.cipher, &s_enc, &cp_random, &pd_random);
		self.record.session.pd_cryptogram = pd_cryptogram;

		let mut pd_client_uid = [0u8; 8];
		pd_client_uid[0] = self.record.address;

		let scbk_d_flag = self.record.flags.contains(PdFlags::USE_SCBK_D);
		let reply = Reply::Ccrypt {
			pd_client_uid,
			pd_random,
			pd_cryptogram,
		};
		self.build_reply(
			&reply,
			sequence,
			Some(SecureBlock {
				scb_type: ScbType::HandshakeResponse,
				extra: if scbk_d_flag { 0 } else { 1 },
			}),
		)
	}

	fn handle_scrypt(&mut self, body: &[u8], sequence: u8) -> Result<(), Error> {
		if body.len() != 16 {
			return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None);
		}
		let mut cp_cryptogram = [0u8; 16];
		cp_cryptogram.copy_from_slice(body);
		self.record.session.cp_cryptogram = cp_cryptogram;

		let expected = secure_channel::compute_cp_cryptogram(
			&self.cipher,
			&self.record.session.s_enc,
			&self.record.session.cp_random,
			&self.record.session.pd_random,
		);
		if !secure_channel::verify_equal(&expected, &cp_cryptogram) {
			self.record.reset_session();
			return self.build_reply(&Reply::Nak(NakCode::ScCondition), sequence, None);
		}

		let seed = secure_channel::initial_mac(&self.record.session.pd_cryptogram);
		self.record.session.r_mac = seed;
		self.record.session.c_mac = seed;
		self.record.flags.insert(PdFlags::SECURE_ACTIVE);
		if self.record.flags.contains(PdFlags::USE_SCBK_D) {
			osdp_warn!(self.logger, "secure channel active with SCBK-D");
		}

		self.build_reply(
			&Reply::RMacI(self.record.session.r_mac),
			sequence,
			Some(SecureBlock {
				scb_type: ScbType::RMacInit,
				extra: 1,
			}),
		)
	}

	fn handle_keyset(&mut self, body: &[u8], sequence: u8) -> Result<(), Error> {
		if !self.record.flags.contains(PdFlags::SECURE_ACTIVE) {
			return self.build_reply(&Reply::Nak(NakCode::ScCondition), sequence, None);
		}
		if body.len() < 2 {
			return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None);
		}
		let length = body[1] as usize;
		if body[0] != 0x01 || length != 16 || body.len() != 2 + length {
			return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None);
		}
		let mut new_key = [0u8; 16];
		new_key.copy_from_slice(&body[2..18]);
		self.record.install_scbk(new_key);
		osdp_debug!(self.logger, "SCBK installed");
		self.build_reply(&Reply::Ack, sequence, None)
	}

	/// Writes one fragment of an inbound file to the backing store and
	/// reports the new offset (spec §4.8: "the receiver writes it and
	/// replies with its new offset"). A fragment whose `file_id` doesn't
	/// match an in-progress transfer starts a new one; the PD is always the
	/// receiving side.
	fn handle_file_transfer(&mut self, body: &[u8], sequence: u8) -> Result<(), Error> {
		let cmd = match catalogue::decode_command(catalogue::opcode::FILETRANSFER, body) {
			Ok(Command::FileTransfer(c)) => c,
			Ok(_) => return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None),
			Err(nak) => return self.build_reply(&Reply::Nak(nak), sequence, None),
		};

		if !self.record.file_transfer.active || self.record.file_transfer.file_id != cmd.file_id {
			self.record.file_transfer = match file_transfer::start_receive(&mut self.file_ops, cmd.file_id, cmd.total_size) {
				Ok(state) => state,
				Err(_) => return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None),
			};
		}

		if cmd.cancel {
			let _ = file_transfer::cancel(&mut self.record.file_transfer, &mut self.file_ops);
			let reply = Reply::FtStat(catalogue::FileTransferStatusReply {
				status: catalogue::file_tx_status::ABORT,
				offset: self.record.file_transfer.offset,
				delay_ms: 0,
			});
			return self.build_reply(&reply, sequence, None);
		}

		if file_transfer::write_chunk(&mut self.record.file_transfer, &mut self.file_ops, cmd.offset, &cmd.data).is_err() {
			return self.build_reply(&Reply::Nak(NakCode::Record), sequence, None);
		}

		let status = if self.record.file_transfer.done() {
			let _ = file_transfer::finish(&mut self.file_ops);
			catalogue::file_tx_status::FINISH
		} else {
			catalogue::file_tx_status::OK
		};
		let reply = Reply::FtStat(catalogue::FileTransferStatusReply {
			status,
			offset: self.record.file_transfer.offset,
			delay_ms: 0,
		});
		self.build_reply(&reply, sequence, None)
	}

	fn handle_ordinary_command(&mut self, op: u8, body: &[u8], sequence: u8) -> Result<(), Error> {
		let cmd = match catalogue::decode_command(op, body) {
			Ok(cmd) => cmd,
			Err(nak) => return self.build_reply(&Reply::Nak(nak), sequence, None),
		};

		if matches!(cmd, Command::Poll) {
			if let Some(event) = self.record.event_queue.pop() {
				return self.build_reply(&event, sequence, None);
			}
		}

		// ID/CAP/LSTAT/ISTAT/OSTAT/RSTAT/COMSET are answered straight from
		// `self.record` rather than through the application callback,
		// matching `original_source/src/osdp_pd.c::pd_build_reply`'s
		// REPLY_PDID/REPLY_PDCAP/REPLY_LSTATR/REPLY_RSTATR/REPLY_COM cases
		// (which read PD-record fields, never consult an app callback).
		// ISTAT/OSTAT are completed the same way even though the upstream
		// switch has no arm for them — a bare `reply->id` with no builder
		// falls through to its NAK path there, which reads as an omission
		// rather than an intentional no-reply.
		match &cmd {
			Command::Id => {
				let reply = Reply::PdId(catalogue::PdIdReply {
					vendor_oui: self.record.info.vendor_oui,
					model: self.record.info.model,
					version: self.record.info.version,
					serial: self.record.info.serial,
					firmware: self.record.info.firmware,
				});
				return self.build_reply(&reply, sequence, None);
			}
			Command::Cap => {
				let mut caps = heapless::Vec::new();
				for cap in self.record.capabilities.iter().filter(|c| c.num_items > 0) {
					let _ = caps.push(*cap);
				}
				return self.build_reply(&Reply::PdCap(caps), sequence, None);
			}
			Command::Lstat => {
				let reply = Reply::LStat(catalogue::LocalStatusReply {
					tamper: self.record.flags.contains(PdFlags::TAMPER),
					power: self.record.flags.contains(PdFlags::POWER),
				});
				return self.build_reply(&reply, sequence, None);
			}
			Command::Istat => {
				return self.build_reply(&Reply::IStat(self.record.io_status.input.clone()), sequence, None);
			}
			Command::Ostat => {
				return self.build_reply(&Reply::OStat(self.record.io_status.output.clone()), sequence, None);
			}
			Command::Rstat => {
				return self.build_reply(&Reply::RStat(self.record.io_status.reader.clone()), sequence, None);
			}
			Command::Comset(_) => {
				let reply = Reply::Com(catalogue::ComsetReply {
					address: self.record.address,
					baud_rate: self.record.baud_rate,
				});
				let _ = self.record.command_queue.push(cmd.clone());
				return self.build_reply(&reply, sequence, None);
			}
			_ => {}
		}

		let _ = self.record.command_queue.push(cmd.clone());
		match self.handler.on_command(&cmd) {
			CommandOutcome::Ack => self.build_reply(&Reply::Ack, sequence, None),
			CommandOutcome::Nak(code) => self.build_reply(&Reply::Nak(code), sequence, None),
			CommandOutcome::MfgReply(mfg) => self.build_reply(&Reply::MfgRep(mfg), sequence, None),
		}
	}

	fn build_reply(&mut self, reply: &Reply, sequence: u8, scb: Option<SecureBlock>) -> Result<(), Error> {
		let mut body = [0u8; RX_BUF_SIZE];
		let (op, body_len) = catalogue::encode_reply(reply, &mut body)?;

		let mut payload = [0u8; RX_BUF_SIZE];
		payload[0] = op;
		payload[1..1 + body_len].copy_from_slice(&body[..body_len]);
		let plain_len = 1 + body_len;

		let secure = self.record.flags.contains(PdFlags::SECURE_ACTIVE) && scb.is_none();
		let (final_scb, out_len) = if secure {
			// Matches the address byte packet::build emits for a
			// Role::Peripheral frame, so the CP's unwrap MACs the same bytes.
			let header = [(self.record.address & 0x7F) | 0x80];
			let mut wrapped = [0u8; RX_BUF_SIZE];
			let n = secure_channel::wrap(
				&self.cipher,
				&self.record.session.s_enc,
				&self.record.session.s_mac1,
				&self.record.session.s_mac2,
				&mut self.record.session.r_mac,
				&header,
				&payload[..plain_len],
				&mut wrapped,
			)?;
			payload[..n].copy_from_slice(&wrapped[..n]);
			(
				Some(SecureBlock {
					scb_type: ScbType::DataEncryptedMac,
					extra: 0,
				}),
				n,
			)
		} else {
			(scb, plain_len)
		};

		let control = Control {
			sequence,
			use_crc: true,
			has_scb: final_scb.is_some(),
		};
		let n = packet::build(WireRole::Peripheral, self.record.address, control, final_scb, &payload[..out_len], &mut self.reply_scratch)?;
		self.reply_len = n;
		self.last_reply[..n].copy_from_slice(&self.reply_scratch[..n]);
		self.last_reply_len = n;
		self.last_reply_sequence = Some(sequence);
		self.record.advance_sequence();
		self.state = State::SendReply;
		Ok(())
	}

	fn send_pending_reply(&mut self) -> Result<(), Error> {
		self.channel.send(&self.reply_scratch[..self.reply_len])?;
		self.state = State::Idle;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::test_support::LoopbackChannel;
	use crate::crypto::test_support::{SoftwareAes, TestRng};
	use crate::file_transfer::test_support::MemoryFile;

	struct NullHandler;
	impl PdCommandHandler for NullHandler {
		fn on_command(&mut self, _cmd: &Command) -> CommandOutcome {
			CommandOutcome::Ack
		}
	}

	fn make_pd() -> Pd<LoopbackChannel, SoftwareAes, TestRng, MemoryFile, NullHandler, 4, 4> {
		Pd::new(
			0,
			9600,
			Some([0u8; 16]),
			LoopbackChannel::new(1),
			SoftwareAes,
			TestRng::seeded(1),
			MemoryFile::empty_of_size(0),
			NullHandler,
		)
	}

	#[test]
	fn plain_poll_yields_ack_reply() {
		let mut pd = make_pd();
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &[catalogue::opcode::POLL], &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				assert_eq!(sent[payload_start], catalogue::opcode::ACK);
				assert_eq!(payload_len, 1);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn id_command_replies_with_intrinsic_pdid() {
		let mut pd = make_pd();
		pd.record.info = crate::pd_model::DeviceInfo {
			vendor_oui: [0xA1, 0xB2, 0xC3],
			model: 0x01,
			version: 0x02,
			serial: [0x78, 0x56, 0x34, 0x12],
			firmware: [0x03, 0x02, 0x01],
		};
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &[catalogue::opcode::ID, 0x00], &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				assert_eq!(sent[payload_start], catalogue::opcode::PDID);
				let reply = catalogue::decode_reply(sent[payload_start], &sent[payload_start + 1..payload_start + payload_len]).unwrap();
				assert_eq!(
					reply,
					Reply::PdId(catalogue::PdIdReply {
						vendor_oui: [0xA1, 0xB2, 0xC3],
						model: 0x01,
						version: 0x02,
						serial: [0x78, 0x56, 0x34, 0x12],
						firmware: [0x03, 0x02, 0x01],
					})
				);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn lstat_command_reflects_tamper_and_power_flags() {
		let mut pd = make_pd();
		pd.record.flags.insert(PdFlags::TAMPER);
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &[catalogue::opcode::LSTAT], &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				let reply = catalogue::decode_reply(sent[payload_start], &sent[payload_start + 1..payload_start + payload_len]).unwrap();
				assert_eq!(
					reply,
					Reply::LStat(catalogue::LocalStatusReply {
						tamper: true,
						power: false,
					})
				);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn cap_command_replies_with_advertised_capabilities_only() {
		let mut pd = make_pd();
		pd.record.set_capability(crate::pd_model::Capability {
			function_code: 1,
			compliance_level: 2,
			num_items: 1,
		});
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &[catalogue::opcode::CAP], &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				let reply = catalogue::decode_reply(sent[payload_start], &sent[payload_start + 1..payload_start + payload_len]).unwrap();
				match reply {
					Reply::PdCap(caps) => {
						assert_eq!(caps.len(), 1);
						assert_eq!(caps[0].function_code, 1);
					}
					other => panic!("expected PdCap, got {other:?}"),
				}
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn comset_command_replies_with_current_address_and_is_queued() {
		let mut pd = make_pd();
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let body = [catalogue::opcode::COMSET, 0x00, 0x80, 0x25, 0x00, 0x00];
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &body, &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				let reply = catalogue::decode_reply(sent[payload_start], &sent[payload_start + 1..payload_start + payload_len]).unwrap();
				assert_eq!(
					reply,
					Reply::Com(catalogue::ComsetReply {
						address: 0,
						baud_rate: 9600,
					})
				);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
		assert!(!pd.record.command_queue.is_empty());
	}

	#[test]
	fn unknown_command_yields_nak() {
		let mut pd = make_pd();
		let mut frame = [0u8; 16];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &[0xEE], &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete { payload_start, .. } => {
				assert_eq!(sent[payload_start], catalogue::opcode::NAK);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
	}

	#[test]
	fn keyset_without_secure_active_is_rejected_and_scbk_unchanged() {
		let mut pd = make_pd();
		let original_scbk = pd.record.scbk;
		assert!(!pd.record.flags.contains(PdFlags::SECURE_ACTIVE));

		let mut frame = [0u8; 32];
		let control = Control {
			sequence: 0,
			use_crc: true,
			has_scb: false,
		};
		let mut body = [0u8; 19];
		body[0] = catalogue::opcode::KEYSET;
		body[1] = 0x01;
		body[2] = 16;
		body[3..19].copy_from_slice(&[0x42; 16]);
		let n = packet::build(WireRole::ControlPanel, 0, control, None, &body, &mut frame).unwrap();
		pd.channel.deliver(&frame[..n]);

		pd.refresh().unwrap();
		pd.refresh().unwrap();

		let sent = pd.channel.drain_sent();
		match packet::parse(&sent, 0) {
			ParseOutcome::Complete {
				payload_start, payload_len, ..
			} => {
				assert_eq!(sent[payload_start], catalogue::opcode::NAK);
				assert_eq!(sent[payload_start + 1], NakCode::ScCondition as u8);
				assert_eq!(payload_len, 2);
			}
			other => panic!("expected Complete, got {other:?}"),
		}
		assert_eq!(pd.record.scbk, original_scbk);
	}
}
