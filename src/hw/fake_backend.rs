use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::transport::{Medium, Transport};
use crate::handlers::{
    AudioClockSetup, ChannelList, DEVICE_ID_REGISTER, DfsEngineState, EchoResult,
    FirmwareVersion, Frame, I2S_MAP_ENTRIES, I2sInputMap, IDENTITY_MAGIC, IDENTITY_REGISTER,
    InfoKind, MacAddress, MasterDescriptor, ModuleDescriptor, NetworkStatistics, OperatingState, PayloadError, RxStatistics, SpeakerDescriptor, TimeInfo,
    WirePayload, decode_payload, encode_payload,
};
use crate::protocol::{
    CommandId, DeviceClass, EEPROM_TO_FLASH, FLASH_TO_EEPROM, command_for_request,
};
use crate::status::SUCCESS_CODE;

const NIOS_RESET_REGISTER: u32 = 0x0040_0064;
const WHOLE_CHIP: u8 = 0xFF;
const SECTOR_SPAN: u32 = 0x0001_0000;
const IMAGE_OK: u8 = 0x01;
const IMAGE_BAD: u8 = 0xFF;
const CUT_SHORT_LEN: usize = 4;

const STATUS_INVALID_COMMAND: u8 = 0x02;
const STATUS_INVALID_PARAMETER: u8 = 0x03;
const STATUS_NOT_ALLOWED: u8 = 0x04;
const STATUS_VERIFY_FAILED: u8 = 0x07;
const STATUS_SPEAKER_NOT_FOUND: u8 = 0x10;

/// What a fake device sends back for one request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeReply {
    /// A well-formed response frame.
    Frame(Frame),
    /// Arbitrary bytes, for noise and truncation scenarios.
    Bytes(Vec<u8>),
    /// Nothing at all; the host read times out.
    Silence,
}

/// Produces replies for requests written to a [`FakeTransport`].
pub trait FakeResponder: Send {
    fn respond(&mut self, request: &Frame) -> FakeReply;
}

impl<F> FakeResponder for F
where
    F: FnMut(&Frame) -> FakeReply + Send,
{
    fn respond(&mut self, request: &Frame) -> FakeReply {
        self(request)
    }
}

#[derive(Debug, Default)]
struct JournalState {
    frames: Vec<Frame>,
    raw_writes: Vec<Vec<u8>>,
    flushes: usize,
    opens: usize,
    closes: usize,
}

/// Shared record of everything written to a fake transport.
#[derive(Debug, Clone, Default)]
pub struct FakeJournal {
    state: Arc<Mutex<JournalState>>,
}

impl FakeJournal {
    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request frames in write order.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    /// Every write as raw bytes, decodable or not.
    #[must_use]
    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.lock().raw_writes.clone()
    }

    /// Number of request frames written.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Number of request frames written for one command.
    #[must_use]
    pub fn count_for(&self, command: CommandId) -> usize {
        self.lock()
            .frames
            .iter()
            .filter(|frame| command_for_request(frame) == Some(command))
            .count()
    }

    /// Number of input flushes requested by the host.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

/// In-memory transport driven by a [`FakeResponder`].
///
/// Reads never block: when no reply bytes are queued the read returns empty,
/// which the framer treats as a timeout.
pub struct FakeTransport {
    name: String,
    medium: Medium,
    available: bool,
    open: bool,
    write_limit: Option<usize>,
    responder: Box<dyn FakeResponder>,
    pending: VecDeque<u8>,
    journal: FakeJournal,
}

impl fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTransport")
            .field("name", &self.name)
            .field("medium", &self.medium)
            .field("available", &self.available)
            .field("open", &self.open)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl FakeTransport {
    /// Creates a closed fake UART transport.
    pub fn new(name: impl Into<String>, responder: impl FakeResponder + 'static) -> Self {
        Self {
            name: name.into(),
            medium: Medium::Uart,
            available: true,
            open: false,
            write_limit: None,
            responder: Box::new(responder),
            pending: VecDeque::new(),
            journal: FakeJournal::default(),
        }
    }

    /// Creates a transport whose device never answers.
    #[must_use]
    pub fn silent(name: impl Into<String>) -> Self {
        Self::new(name, |_request: &Frame| FakeReply::Silence)
    }

    /// Reports a different medium, changing which link faults apply.
    #[must_use]
    pub fn with_medium(mut self, medium: Medium) -> Self {
        self.medium = medium;
        self
    }

    /// Makes `open` fail as if the device node were absent.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Accepts at most `limit` bytes per write.
    #[must_use]
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Returns a handle onto this transport's write journal.
    #[must_use]
    pub fn journal(&self) -> FakeJournal {
        self.journal.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn medium(&self) -> Medium {
        self.medium
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> bool {
        if self.available && !self.open {
            self.open = true;
            self.journal.lock().opens += 1;
        }
        self.open
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.pending.clear();
            self.journal.lock().closes += 1;
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> usize {
        if !self.open {
            return 0;
        }
        let accepted = self.write_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        self.journal.lock().raw_writes.push(bytes.to_vec());
        if accepted < bytes.len() {
            return accepted;
        }

        let Ok(request) = Frame::decode(bytes) else {
            trace!(transport = %self.name, "fake transport ignored undecodable write");
            return accepted;
        };
        self.journal.lock().frames.push(request.clone());
        match self.responder.respond(&request) {
            FakeReply::Frame(frame) => {
                if let Ok(encoded) = frame.encode() {
                    self.pending.extend(encoded);
                }
            }
            FakeReply::Bytes(raw) => self.pending.extend(raw),
            FakeReply::Silence => {}
        }
        accepted
    }

    async fn read(&mut self, max: usize, _timeout: Duration) -> Vec<u8> {
        if !self.open {
            return Vec::new();
        }
        let count = max.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    async fn flush_input(&mut self) {
        self.pending.clear();
        self.journal.lock().flushes += 1;
    }
}

/// Mutable state of one simulated module.
#[derive(Debug)]
struct DeviceState {
    class: DeviceClass,
    responsive: bool,
    module: ModuleDescriptor,
    speaker: SpeakerDescriptor,
    max_speakers: u8,
    network_id: u16,
    registers: HashMap<u32, u16>,
    radio_channel: u16,
    transmit_power: u8,
    rx_statistics: RxStatistics,
    flash: BTreeMap<u32, u8>,
    slots: [Vec<u8>; 2],
    active_slot: u8,
    eeprom: Vec<u8>,
    fail_verify: bool,
    zone: u8,
    volume: u8,
    muted: bool,
    autostart: bool,
    led_disabled: bool,
    map_type: u8,
    tpm_mode: u8,
    beacon_period: Option<u16>,
    streaming: bool,
    speakers: Vec<(ModuleDescriptor, SpeakerDescriptor)>,
    echo_count: u32,
    reboots: u32,
    /// Raw firmware records keyed by `(kind code, index)`.
    records: HashMap<(u8, u8), Vec<u8>>,
    block_events: bool,
    ir_filter: u16,
    rx_control: bool,
    max_zone: u8,
    audio_clock: AudioClockSetup,
    i2s_map: I2sInputMap,
    volume_trims: HashMap<u8, i16>,
    syslog: Vec<u8>,
}

/// A scriptable model of one Summit module.
///
/// Clones share state, so a test can keep one handle for inspection while a
/// transport owns another.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Creates a master module with the given MAC.
    #[must_use]
    pub fn master(mac: MacAddress) -> Self {
        Self::new(DeviceClass::Master, mac)
    }

    /// Creates a slave module with the given MAC.
    #[must_use]
    pub fn slave(mac: MacAddress) -> Self {
        Self::new(DeviceClass::Slave, mac)
    }

    fn new(class: DeviceClass, mac: MacAddress) -> Self {
        let registers = HashMap::from([
            (IDENTITY_REGISTER, IDENTITY_MAGIC),
            (DEVICE_ID_REGISTER, 0x0908),
        ]);
        let module = ModuleDescriptor {
            module_id: match class {
                DeviceClass::Master => 0x0100,
                DeviceClass::Slave => 0x0200,
            },
            hardware_type: 0x01,
            hardware_revision: 0x03,
            firmware_version: FirmwareVersion::from_raw(0x0051),
            mac,
        };

        Self {
            state: Arc::new(Mutex::new(DeviceState {
                class,
                responsive: true,
                module,
                speaker: SpeakerDescriptor {
                    speaker_type: 0x02,
                    slot_index: 0,
                    zone: 0,
                    channel_map: 0x01,
                },
                max_speakers: 11,
                network_id: 0x5A5A,
                registers,
                radio_channel: 36,
                transmit_power: 15,
                rx_statistics: RxStatistics::default(),
                flash: BTreeMap::new(),
                slots: [vec![0xA5; 16], Vec::new()],
                active_slot: 0,
                eeprom: Vec::new(),
                fail_verify: false,
                zone: 0,
                volume: 50,
                muted: false,
                autostart: false,
                led_disabled: false,
                map_type: 0,
                tpm_mode: 0,
                beacon_period: None,
                streaming: false,
                speakers: Vec::new(),
                echo_count: 0,
                reboots: 0,
                records: seed_records(mac),
                block_events: false,
                ir_filter: 0,
                rx_control: false,
                max_zone: 0,
                audio_clock: AudioClockSetup::default(),
                i2s_map: I2sInputMap::default(),
                volume_trims: HashMap::new(),
                syslog: b"boot: radio up\n".to_vec(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wraps a clone of this device in a fresh fake transport.
    #[must_use]
    pub fn transport(&self, name: impl Into<String>) -> FakeTransport {
        FakeTransport::new(name, self.clone())
    }

    /// Presets one register.
    #[must_use]
    pub fn with_register(self, address: u32, value: u16) -> Self {
        self.lock().registers.insert(address, value);
        self
    }

    /// Sets the speaker descriptor returned by local info queries.
    #[must_use]
    pub fn with_speaker(self, speaker: SpeakerDescriptor) -> Self {
        self.lock().speaker = speaker;
        self
    }

    /// Adds a speaker to a master's network table.
    #[must_use]
    pub fn with_network_speaker(self, module: ModuleDescriptor, speaker: SpeakerDescriptor) -> Self {
        self.lock().speakers.push((module, speaker));
        self
    }

    /// Stops answering anything, like a non-Summit device on the same bus.
    #[must_use]
    pub fn unresponsive(self) -> Self {
        self.lock().responsive = false;
        self
    }

    /// Makes image checks report a CRC failure.
    pub fn set_fail_verify(&self, fail: bool) {
        self.lock().fail_verify = fail;
    }

    #[must_use]
    pub fn mac(&self) -> MacAddress {
        self.lock().module.mac
    }

    #[must_use]
    pub fn active_slot(&self) -> u8 {
        self.lock().active_slot
    }

    /// Contents of one firmware slot.
    #[must_use]
    pub fn slot_image(&self, slot: u8) -> Vec<u8> {
        self.lock()
            .slots
            .get(usize::from(slot))
            .cloned()
            .unwrap_or_default()
    }

    /// Contents of the EEPROM image area.
    #[must_use]
    pub fn eeprom_image(&self) -> Vec<u8> {
        self.lock().eeprom.clone()
    }

    /// Replaces the EEPROM image area.
    pub fn set_eeprom_image(&self, image: Vec<u8>) {
        self.lock().eeprom = image;
    }

    /// Reads flash, with erased bytes as `0xFF`.
    #[must_use]
    pub fn flash(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.lock();
        (0..len)
            .map(|offset| {
                let address = address.wrapping_add(u32::try_from(offset).unwrap_or(u32::MAX));
                state.flash.get(&address).copied().unwrap_or(0xFF)
            })
            .collect()
    }

    #[must_use]
    pub fn zone(&self) -> u8 {
        self.lock().zone
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.lock().volume
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    #[must_use]
    pub fn max_zone(&self) -> u8 {
        self.lock().max_zone
    }

    #[must_use]
    pub fn rx_control(&self) -> bool {
        self.lock().rx_control
    }

    #[must_use]
    pub fn ir_filter(&self) -> u16 {
        self.lock().ir_filter
    }

    #[must_use]
    pub fn audio_clock(&self) -> AudioClockSetup {
        self.lock().audio_clock
    }

    #[must_use]
    pub fn i2s_map(&self) -> I2sInputMap {
        self.lock().i2s_map.clone()
    }

    #[must_use]
    pub fn echo_count(&self) -> u32 {
        self.lock().echo_count
    }

    #[must_use]
    pub fn reboot_count(&self) -> u32 {
        self.lock().reboots
    }

    #[must_use]
    pub fn register(&self, address: u32) -> Option<u16> {
        self.lock().registers.get(&address).copied()
    }
}

impl FakeResponder for SimulatedDevice {
    fn respond(&mut self, request: &Frame) -> FakeReply {
        let mut state = self.lock();
        if !state.responsive {
            return FakeReply::Silence;
        }
        let Some(command) = command_for_request(request) else {
            return reply(request, STATUS_INVALID_COMMAND, Vec::new());
        };
        if !command.metadata().family().allows(state.class) {
            return reply(request, STATUS_INVALID_COMMAND, Vec::new());
        }

        match state.handle(command, request.payload()) {
            Ok(Outcome::Reply(status, payload)) => reply(request, status, payload),
            Ok(Outcome::CutShort) => cut_short(request),
            Err(_error) => reply(request, STATUS_INVALID_PARAMETER, Vec::new()),
        }
    }
}

enum Outcome {
    Reply(u8, Vec<u8>),
    /// The CPU resets while answering; only the start of the header leaves.
    CutShort,
}

fn ok<T: WirePayload>(value: &T) -> Result<Outcome, PayloadError> {
    Ok(Outcome::Reply(SUCCESS_CODE, encode_payload(value)))
}

fn status(code: u8) -> Result<Outcome, PayloadError> {
    Ok(Outcome::Reply(code, Vec::new()))
}

fn seed_records(mac: MacAddress) -> HashMap<(u8, u8), Vec<u8>> {
    let mut wisa = b"WISA".to_vec();
    wisa.extend(mac.octets());
    HashMap::from([
        ((InfoKind::WisaDescriptor.code(), 0), wisa),
        ((InfoKind::KeyStatus.code(), 0), vec![0x01]),
        ((InfoKind::AmplifierDescriptor.code(), 0), vec![0xA0, 0x02]),
        ((InfoKind::CoefficientInfo.code(), 0), vec![0x00, 0x10]),
        ((InfoKind::CoefficientInfo.code(), 1), vec![0x01, 0x10]),
    ])
}

/// Plain descriptor queries carry only the kind; record queries add an index.
fn info_request(payload: &[u8]) -> Result<(InfoKind, u8), PayloadError> {
    if payload.len() > 1 {
        decode_payload(payload)
    } else {
        Ok((decode_payload(payload)?, 0))
    }
}

fn reply(request: &Frame, status: u8, payload: Vec<u8>) -> FakeReply {
    FakeReply::Frame(Frame::response_to(request, status, payload))
}

fn cut_short(request: &Frame) -> FakeReply {
    Frame::response_to(request, SUCCESS_CODE, Vec::new())
        .encode()
        .map_or(FakeReply::Silence, |bytes| {
            FakeReply::Bytes(bytes.into_iter().take(CUT_SHORT_LEN).collect())
        })
}

impl DeviceState {
    fn handle(&mut self, command: CommandId, payload: &[u8]) -> Result<Outcome, PayloadError> {
        match command {
            CommandId::ReadRegister => {
                let address: u32 = decode_payload(payload)?;
                ok(&self.registers.get(&address).copied().unwrap_or(0))
            }
            CommandId::WriteRegister => {
                let (address, value): (u32, u16) = decode_payload(payload)?;
                self.registers.insert(address, value);
                if address == NIOS_RESET_REGISTER && value != 0 {
                    self.reboots += 1;
                    return Ok(Outcome::CutShort);
                }
                ok(&())
            }
            CommandId::GetRadioChannel => ok(&self.radio_channel),
            CommandId::SetRadioChannel => {
                let (_radio, channel): (u8, u16) = decode_payload(payload)?;
                self.radio_channel = channel;
                ok(&())
            }
            CommandId::GetTransmitPower => ok(&self.transmit_power),
            CommandId::SetTransmitPower => {
                self.transmit_power = decode_payload(payload)?;
                ok(&())
            }
            CommandId::TransmitPackets => {
                let count: u32 = decode_payload(payload)?;
                self.rx_statistics.total_packets =
                    self.rx_statistics.total_packets.saturating_add(count);
                ok(&())
            }
            CommandId::GetRxStatistics => ok(&self.rx_statistics),
            CommandId::ResetRxStatistics => {
                self.rx_statistics = RxStatistics::default();
                ok(&())
            }
            CommandId::GetSystemQuality => ok(&0x00C8u16),
            CommandId::GetTemperature => ok(&41u16),
            CommandId::GetTimeInfo => ok(&TimeInfo {
                uptime_seconds: 3_600,
                log_entries: 12,
            }),
            CommandId::GetDutyCycle => ok(&18u8),
            CommandId::ReadFlash => {
                let (address, len): (u32, u16) = decode_payload(payload)?;
                let bytes: Vec<u8> = (0..u32::from(len))
                    .map(|offset| {
                        self.flash
                            .get(&address.wrapping_add(offset))
                            .copied()
                            .unwrap_or(0xFF)
                    })
                    .collect();
                ok(&bytes)
            }
            CommandId::WriteFlash => {
                let (address, data): (u32, Vec<u8>) = decode_payload(payload)?;
                for (offset, byte) in (0u32..).zip(&data) {
                    self.flash.insert(address.wrapping_add(offset), *byte);
                }
                ok(&u16::try_from(data.len()).unwrap_or(u16::MAX))
            }
            CommandId::EraseFlash => {
                let sector: u8 = decode_payload(payload)?;
                if sector == WHOLE_CHIP {
                    self.flash.clear();
                } else {
                    let start = u32::from(sector) * SECTOR_SPAN;
                    self.flash.retain(|address, _byte| {
                        !(start..start + SECTOR_SPAN).contains(address)
                    });
                }
                ok(&())
            }
            CommandId::GetActiveImage => {
                let _device: u8 = decode_payload(payload)?;
                ok(&self.active_slot)
            }
            CommandId::SetActiveImage => {
                let (_device, slot): (u8, u8) = decode_payload(payload)?;
                if slot > 1 {
                    return status(STATUS_INVALID_PARAMETER);
                }
                if self.image_check(slot) != IMAGE_OK {
                    return status(STATUS_VERIFY_FAILED);
                }
                self.active_slot = slot;
                self.reboots += 1;
                ok(&())
            }
            CommandId::EraseImage => {
                let (_device, slot): (u8, u8) = decode_payload(payload)?;
                if slot == self.active_slot {
                    return status(STATUS_NOT_ALLOWED);
                }
                let Some(image) = self.slots.get_mut(usize::from(slot)) else {
                    return status(STATUS_INVALID_PARAMETER);
                };
                if image.is_empty() {
                    return status(STATUS_INVALID_COMMAND);
                }
                image.clear();
                ok(&())
            }
            CommandId::LoadFirmware => {
                let (_device, slot, offset, data): (u8, u8, u32, Vec<u8>) =
                    decode_payload(payload)?;
                if slot == self.active_slot {
                    return status(STATUS_NOT_ALLOWED);
                }
                let Some(image) = self.slots.get_mut(usize::from(slot)) else {
                    return status(STATUS_INVALID_PARAMETER);
                };
                let start = usize::try_from(offset).unwrap_or(usize::MAX);
                let Some(end) = start.checked_add(data.len()) else {
                    return status(STATUS_INVALID_PARAMETER);
                };
                if image.len() < end {
                    image.resize(end, 0xFF);
                }
                image[start..end].copy_from_slice(&data);
                ok(&u32::try_from(data.len()).unwrap_or(u32::MAX))
            }
            CommandId::CheckImage => {
                let (_device, slot): (u8, u8) = decode_payload(payload)?;
                ok(&self.image_check(slot))
            }
            CommandId::CopyFirmwareToEeprom => {
                let (direction, slot, _start): (u8, u8, u32) = decode_payload(payload)?;
                if direction != FLASH_TO_EEPROM {
                    return status(STATUS_INVALID_PARAMETER);
                }
                let Some(image) = self.slots.get(usize::from(slot)) else {
                    return status(STATUS_INVALID_PARAMETER);
                };
                self.eeprom = image.clone();
                ok(&())
            }
            CommandId::CopyFirmwareFromEeprom => {
                let (direction, slot, _start): (u8, u8, u32) = decode_payload(payload)?;
                if direction != EEPROM_TO_FLASH || usize::from(slot) >= self.slots.len() {
                    return status(STATUS_INVALID_PARAMETER);
                }
                if slot == self.active_slot || self.eeprom.is_empty() {
                    return status(STATUS_NOT_ALLOWED);
                }
                self.slots[usize::from(slot)] = self.eeprom.clone();
                ok(&())
            }
            CommandId::GetMasterInfo => {
                let (kind, index) = info_request(payload)?;
                match kind {
                    InfoKind::OperatingState => ok(&self.operating_state()),
                    InfoKind::ModuleDescriptor => ok(&MasterDescriptor {
                        module: self.module,
                        max_speakers: self.max_speakers,
                        network_id: self.network_id,
                    }),
                    InfoKind::SpeakerDescriptor => ok(&self.speaker),
                    InfoKind::NetworkStatistics => ok(&NetworkStatistics::default()),
                    _ => self.record(kind, index),
                }
            }
            CommandId::GetLocalInfo => {
                let (kind, index) = info_request(payload)?;
                match kind {
                    InfoKind::OperatingState => ok(&self.operating_state()),
                    InfoKind::ModuleDescriptor => ok(&self.module),
                    InfoKind::SpeakerDescriptor => ok(&self.speaker),
                    InfoKind::NetworkStatistics => ok(&NetworkStatistics {
                        packets_sent: 1_000,
                        packet_receive_errors: [1, 0, 0, 2],
                        retransmissions: 3,
                    }),
                    _ => self.record(kind, index),
                }
            }
            CommandId::SetMasterInfo | CommandId::SetLocalInfo => {
                let (kind, index, record): (InfoKind, u8, Vec<u8>) = decode_payload(payload)?;
                if !kind.is_record() {
                    return status(STATUS_INVALID_PARAMETER);
                }
                self.records.insert((kind.code(), index), record);
                ok(&())
            }
            CommandId::GetSpeakerInfo => {
                let (index, kind): (u8, InfoKind) = decode_payload(payload)?;
                let Some((module, speaker)) = self.speakers.get(usize::from(index)).copied()
                else {
                    return status(STATUS_SPEAKER_NOT_FOUND);
                };
                match kind {
                    InfoKind::OperatingState => ok(&self.operating_state()),
                    InfoKind::ModuleDescriptor => ok(&module),
                    InfoKind::SpeakerDescriptor => ok(&speaker),
                    InfoKind::NetworkStatistics => ok(&NetworkStatistics::default()),
                    InfoKind::WisaDescriptor => {
                        let mut record = vec![speaker.speaker_type];
                        record.extend(module.mac.octets());
                        ok(&record)
                    }
                    InfoKind::KeyStatus => ok(&vec![0x01u8]),
                    InfoKind::AmplifierDescriptor | InfoKind::CoefficientInfo => {
                        status(STATUS_INVALID_PARAMETER)
                    }
                }
            }
            CommandId::GetSpeakerCount => {
                ok(&u8::try_from(self.speakers.len()).unwrap_or(u8::MAX))
            }
            CommandId::GetMapType => ok(&self.map_type),
            CommandId::SetMapType => {
                self.map_type = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetZone => ok(&self.zone),
            CommandId::SetZone => {
                self.zone = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetAutostart => ok(&self.autostart),
            CommandId::SetAutostart => {
                self.autostart = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetLedDisable => ok(&self.led_disabled),
            CommandId::SetLedDisable => {
                self.led_disabled = decode_payload(payload)?;
                ok(&())
            }
            CommandId::Beacon => {
                let (enable, period): (bool, u16) = decode_payload(payload)?;
                self.beacon_period = enable.then_some(period);
                ok(&())
            }
            CommandId::Start => {
                self.streaming = true;
                ok(&())
            }
            CommandId::Stop => {
                self.streaming = false;
                ok(&())
            }
            CommandId::GetVolume => ok(&self.volume),
            CommandId::SetVolume => {
                self.volume = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetVolumeTrim => {
                let speaker: u8 = decode_payload(payload)?;
                ok(&self.volume_trims.get(&speaker).copied().unwrap_or(0))
            }
            CommandId::SetVolumeTrim => {
                let (speaker, trim): (u8, i16) = decode_payload(payload)?;
                self.volume_trims.insert(speaker, trim);
                ok(&())
            }
            CommandId::SetMaxZone => {
                self.max_zone = decode_payload(payload)?;
                ok(&())
            }
            CommandId::SetRxControl => {
                self.rx_control = decode_payload(payload)?;
                ok(&())
            }
            CommandId::SetIrFilter => {
                self.ir_filter = decode_payload(payload)?;
                ok(&())
            }
            CommandId::SetupAudioClock => {
                self.audio_clock = decode_payload(payload)?;
                ok(&())
            }
            CommandId::SetI2sInputMap => {
                let map: I2sInputMap = decode_payload(payload)?;
                if map.0.len() > I2S_MAP_ENTRIES {
                    return status(STATUS_INVALID_PARAMETER);
                }
                self.i2s_map = map;
                ok(&())
            }
            CommandId::GetBlockEvents => ok(&self.block_events),
            CommandId::SetBlockEvents => {
                self.block_events = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetSyslogData => ok(&std::mem::take(&mut self.syslog)),
            CommandId::GetPdout => {
                let (_delay, samples): (u16, u16) = decode_payload(payload)?;
                ok(&(0x0100u16 + samples.min(0xFF)))
            }
            CommandId::GetMute => ok(&self.muted),
            CommandId::SetMute => {
                self.muted = decode_payload(payload)?;
                ok(&())
            }
            CommandId::Echo => {
                let index: u8 = decode_payload(payload)?;
                if usize::from(index) >= self.speakers.len() {
                    return status(STATUS_SPEAKER_NOT_FOUND);
                }
                self.echo_count += 1;
                ok(&EchoResult {
                    tx_antenna: 1,
                    rx_antenna: 2,
                })
            }
            CommandId::GetDfsEngineState => ok(&DfsEngineState {
                enabled: true,
                current_channel: self.radio_channel,
                radar_events: 0,
            }),
            CommandId::GetDfsStaticChannels => ok(&ChannelList(vec![36, 40, 44, 48])),
            CommandId::SetDfsOverride => {
                self.radio_channel = decode_payload(payload)?;
                ok(&())
            }
            CommandId::GetTpmMode => ok(&self.tpm_mode),
            CommandId::SetTpmMode => {
                self.tpm_mode = decode_payload(payload)?;
                ok(&())
            }
            CommandId::Restore | CommandId::Shutdown => {
                self.streaming = false;
                ok(&())
            }
            CommandId::SetPowerCompensation
            | CommandId::WriteRadioRegister
            | CommandId::SaveMasterMfgData
            | CommandId::SaveConfiguration
            | CommandId::Discover
            | CommandId::AssignSlot
            | CommandId::ResetSpeaker
            | CommandId::SelectCoefficientTable
            | CommandId::SetAudioDelay
            | CommandId::Chime
            | CommandId::SaveSlaveMfgData
            | CommandId::SlaveChime => ok(&()),
        }
    }

    fn record(&self, kind: InfoKind, index: u8) -> Result<Outcome, PayloadError> {
        match self.records.get(&(kind.code(), index)) {
            Some(record) => ok(record),
            None => status(STATUS_INVALID_PARAMETER),
        }
    }

    fn image_check(&self, slot: u8) -> u8 {
        match self.slots.get(usize::from(slot)) {
            Some(image) if !image.is_empty() && !self.fail_verify => IMAGE_OK,
            _ => IMAGE_BAD,
        }
    }

    fn operating_state(&self) -> OperatingState {
        OperatingState {
            mode: u8::from(self.streaming),
            radio_channel: self.radio_channel,
            associated_speakers: u8::try_from(self.speakers.len()).unwrap_or(u8::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::Opcode;
    use crate::protocol::CommandAccess;

    fn mac() -> MacAddress {
        MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x01])
    }

    fn request(command: CommandId, payload: Vec<u8>) -> Frame {
        let metadata = command.metadata();
        Frame::request(metadata.opcode(), metadata.access(), 1, payload)
    }

    #[test]
    fn simulated_device_answers_identity_probe() {
        let mut device = SimulatedDevice::slave(mac());
        let reply = device.respond(&request(
            CommandId::ReadRegister,
            encode_payload(&IDENTITY_REGISTER),
        ));

        let FakeReply::Frame(frame) = reply else {
            panic!("identity probe should be answered with a frame");
        };
        assert_eq!(SUCCESS_CODE, frame.status());
        assert_eq!(IDENTITY_MAGIC.to_le_bytes().to_vec(), frame.into_payload());
    }

    #[test]
    fn simulated_device_rejects_unknown_opcodes() {
        let mut device = SimulatedDevice::master(mac());
        let frame = Frame::request(Opcode::new(0x7E, 0x7E), CommandAccess::Query, 1, Vec::new());

        let FakeReply::Frame(reply) = device.respond(&frame) else {
            panic!("unknown opcode should still be answered");
        };
        assert_eq!(STATUS_INVALID_COMMAND, reply.status());
    }

    #[test]
    fn unresponsive_device_stays_silent() {
        let mut device = SimulatedDevice::slave(mac()).unresponsive();
        assert_eq!(
            FakeReply::Silence,
            device.respond(&request(CommandId::GetTemperature, Vec::new()))
        );
    }

    #[tokio::test]
    async fn transport_journals_writes_and_queues_replies() {
        let device = SimulatedDevice::slave(mac());
        let mut transport = device.transport("ttyFAKE0");
        let journal = transport.journal();
        assert!(transport.open().await);

        let bytes = request(CommandId::GetTemperature, Vec::new())
            .encode()
            .expect("request should encode");
        assert_eq!(bytes.len(), transport.write(&bytes).await);
        assert_eq!(1, journal.count_for(CommandId::GetTemperature));

        let response = transport.read(64, Duration::ZERO).await;
        let frame = Frame::decode(&response).expect("reply should decode");
        assert_eq!(41u16.to_le_bytes().to_vec(), frame.into_payload());
    }

    #[tokio::test]
    async fn closed_transport_accepts_nothing() {
        let mut transport = FakeTransport::silent("ttyFAKE1");
        assert_eq!(0, transport.write(&[0x01, 0x01]).await);
        assert!(transport.read(8, Duration::ZERO).await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_transport_fails_to_open() {
        let mut transport = FakeTransport::silent("ttyMISSING").unavailable();
        assert!(!transport.open().await);
        assert!(!transport.is_open());
    }
}
