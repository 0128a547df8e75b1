//! Byte-level model of an SPI-mode SD/MMC card, plus a thread that plays
//! the 10 ms timer interrupt.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crc::{Crc, CRC_16_XMODEM, CRC_7_MMC};
use fugit::HertzU32;
use mmc_spi::{DiskState, FixedSocket, Socket, Transport, SECTOR_SIZE};

const CRC7: Crc<u8> = Crc::<u8>::new(&CRC_7_MMC);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// SD v1.x, 1 GB
pub const CSD_V1: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0x03, 0xBF, 0xC0, 0x03, 0xFF, 0x80, 0x02, 0x40, 0x00, 0x01,
];
pub const CSD_V1_SECTORS: u32 = 1_966_080;

/// SD v2.0, 8 GB
pub const CSD_V2: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x3B, 0x37, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x01,
];
pub const CSD_V2_SECTORS: u32 = 15_523_840;

/// MMC, 1 GB, 32 x 13 sector erase groups
pub const CSD_MMC: [u8; 16] = [
    0x80, 0x00, 0x00, 0x00, 0x00, 0x09, 0x03, 0xFF, 0xC0, 0x03, 0xFD, 0x80, 0x02, 0x40, 0x00, 0x01,
];

pub const CID: [u8; 16] = *b"\x03SDSC08G\x80\x12\x34\x56\x78\x01\x4A\x01";

/// ACMD41 / CMD1 polls before the card leaves the idle state.
const IDLE_POLLS: u32 = 3;
/// Busy bytes after a programmed block or an erase.
const BUSY_BYTES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SdV2 { high_capacity: bool },
    SdV1,
    Mmc,
    /// Answers CMD0/CMD8 but never leaves the idle state.
    Stuck,
    /// Nothing on the bus.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logged {
    pub index: u8,
    pub arg: u32,
    pub app: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Sector(u32),
    Isdio(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Command,
    ReadMulti { next: u32 },
    WriteWait { multi: bool, target: Target },
    WriteData { multi: bool, target: Target, data: Vec<u8> },
}

pub struct SimCard {
    pub kind: Kind,
    pub commands: Vec<Logged>,
    /// every exchange, select and deselect
    pub traffic: usize,
    pub clock: Option<HertzU32>,
    pub csd: [u8; 16],
    pub sd_status: [u8; 64],
    pub isdio: Vec<u8>,
    /// reads of this sector answer with an error token
    pub fail_sector: Option<u32>,
    pub corrupt_crc: bool,
    /// single-block reads are accepted but no packet follows
    pub withhold_data: bool,
    /// an erase keeps the card busy for good
    pub stuck_erase: bool,
    storage: HashMap<u32, [u8; SECTOR_SIZE]>,
    selected: bool,
    idle: bool,
    app_next: bool,
    idle_polls: u32,
    erase: (u32, u32),
    frame: Vec<u8>,
    mode: Mode,
    out: VecDeque<u8>,
    busy: u32,
}

/// Content of a sector nobody has written.
pub fn pattern(sector: u32) -> [u8; SECTOR_SIZE] {
    let mut block = [0u8; SECTOR_SIZE];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = (sector as u8).wrapping_mul(31).wrapping_add(i as u8);
    }
    block
}

impl SimCard {
    pub fn new(kind: Kind) -> Self {
        let csd = match kind {
            Kind::SdV1 => CSD_V1,
            Kind::Mmc => CSD_MMC,
            _ => CSD_V2,
        };
        let mut sd_status = [0u8; 64];
        sd_status[10] = 0x90; // AU_SIZE 4 MB
        Self {
            kind,
            commands: Vec::new(),
            traffic: 0,
            clock: None,
            csd,
            sd_status,
            isdio: vec![0; 0x1000],
            fail_sector: None,
            corrupt_crc: false,
            withhold_data: false,
            stuck_erase: false,
            storage: HashMap::new(),
            selected: false,
            idle: true,
            app_next: false,
            idle_polls: IDLE_POLLS,
            erase: (0, 0),
            frame: Vec::new(),
            mode: Mode::Command,
            out: VecDeque::new(),
            busy: 0,
        }
    }

    pub fn sector(&self, sector: u32) -> [u8; SECTOR_SIZE] {
        self.storage.get(&sector).copied().unwrap_or_else(|| pattern(sector))
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn count(&self, index: u8) -> usize {
        self.commands.iter().filter(|c| c.index == index && !c.app).count()
    }

    pub fn count_app(&self, index: u8) -> usize {
        self.commands.iter().filter(|c| c.index == index && c.app).count()
    }

    fn block_addressed(&self) -> bool {
        self.kind == Kind::SdV2 { high_capacity: true }
    }

    fn to_sector(&self, arg: u32) -> u32 {
        if self.block_addressed() {
            arg
        } else {
            arg / SECTOR_SIZE as u32
        }
    }

    fn r1(&self) -> u8 {
        self.idle as u8
    }

    fn respond(&mut self, bytes: &[u8]) {
        // one byte of Ncr before the response
        self.out.push_back(0xFF);
        self.out.extend(bytes);
    }

    fn queue_packet(&mut self, payload: &[u8]) {
        let mut crc = CRC16.checksum(payload);
        if self.corrupt_crc {
            crc = !crc;
        }
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(payload);
        self.out.extend(crc.to_be_bytes());
    }

    fn queue_sector(&mut self, sector: u32) {
        if self.fail_sector == Some(sector) {
            // out-of-range error token
            self.out.extend([0xFF, 0x08]);
        } else {
            let block = self.sector(sector);
            self.queue_packet(&block);
        }
    }

    fn command(&mut self, frame: [u8; 6]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = std::mem::take(&mut self.app_next);
        self.commands.push(Logged { index, arg, app });

        if matches!(index, 0 | 8) && frame[5] != CRC7.checksum(&frame[..5]) << 1 | 1 {
            self.respond(&[self.r1() | 0x08]);
            return;
        }

        let sd = matches!(self.kind, Kind::SdV2 { .. } | Kind::SdV1 | Kind::Stuck);
        let v2 = matches!(self.kind, Kind::SdV2 { .. } | Kind::Stuck);
        let illegal = self.r1() | 0x04;

        match (index, app) {
            (0, _) => {
                self.idle = true;
                self.idle_polls = IDLE_POLLS;
                self.mode = Mode::Command;
                self.respond(&[0x01]);
            }
            (8, _) if v2 => {
                let r1 = self.r1();
                self.respond(&[r1, 0x00, 0x00, ((arg >> 8) & 0xF) as u8, arg as u8]);
            }
            (55, _) if sd => {
                self.app_next = true;
                self.respond(&[self.r1()]);
            }
            (41, true) | (1, false) => {
                let accepted = if index == 41 { sd } else { self.kind == Kind::Mmc };
                if !accepted {
                    self.respond(&[illegal]);
                    return;
                }
                if self.kind != Kind::Stuck {
                    self.idle_polls = self.idle_polls.saturating_sub(1);
                    if self.idle_polls == 0 {
                        self.idle = false;
                    }
                }
                self.respond(&[self.r1()]);
            }
            (58, _) => {
                let ccs = if self.block_addressed() { 0x40 } else { 0x00 };
                let r1 = self.r1();
                self.respond(&[r1, 0x80 | ccs, 0xFF, 0x80, 0x00]);
            }
            (16, _) => {
                let r1 = if arg == SECTOR_SIZE as u32 { self.r1() } else { 0x40 };
                self.respond(&[r1]);
            }
            _ if self.idle => self.respond(&[illegal]),
            (9, false) | (10, false) => {
                let register = if index == 9 { self.csd } else { CID };
                self.respond(&[0x00]);
                self.queue_packet(&register);
            }
            (13, true) => {
                // R2
                self.respond(&[0x00, 0x00]);
                let status = self.sd_status;
                self.queue_packet(&status);
            }
            (17, false) => {
                self.respond(&[0x00]);
                if !self.withhold_data {
                    let sector = self.to_sector(arg);
                    self.queue_sector(sector);
                }
            }
            (18, false) => {
                self.respond(&[0x00]);
                self.mode = Mode::ReadMulti {
                    next: self.to_sector(arg),
                };
            }
            (12, false) => {
                self.mode = Mode::Command;
                self.out.clear();
                // stuff byte, then R1
                self.out.extend([0xFF, 0x00]);
            }
            (23, true) => self.respond(&[0x00]),
            (24, false) | (25, false) => {
                self.respond(&[0x00]);
                self.mode = Mode::WriteWait {
                    multi: index == 25,
                    target: Target::Sector(self.to_sector(arg)),
                };
            }
            (32, false) if sd => {
                self.erase.0 = self.to_sector(arg);
                self.respond(&[0x00]);
            }
            (33, false) if sd => {
                self.erase.1 = self.to_sector(arg);
                self.respond(&[0x00]);
            }
            (38, false) if sd => {
                for sector in self.erase.0..=self.erase.1 {
                    self.storage.insert(sector, [0xFF; SECTOR_SIZE]);
                }
                self.respond(&[0x00]);
                self.busy = if self.stuck_erase { u32::MAX } else { BUSY_BYTES };
            }
            (48, false) => {
                let addr = ((arg >> 9) & 0x1_FFFF) as usize;
                let mut packet = [0u8; 512];
                for (i, byte) in packet.iter_mut().enumerate() {
                    *byte = self.isdio.get(addr + i).copied().unwrap_or(0);
                }
                self.respond(&[0x00]);
                self.queue_packet(&packet);
            }
            (49, false) => {
                self.respond(&[0x00]);
                self.mode = Mode::WriteWait {
                    multi: false,
                    target: Target::Isdio(arg),
                };
            }
            _ => self.respond(&[illegal]),
        }
    }

    fn commit(&mut self, target: Target, data: &[u8]) {
        match target {
            Target::Sector(sector) => {
                let mut block = [0u8; SECTOR_SIZE];
                block.copy_from_slice(&data[..SECTOR_SIZE]);
                self.storage.insert(sector, block);
            }
            Target::Isdio(arg) => {
                let addr = ((arg >> 9) & 0x1_FFFF) as usize;
                if arg & 0x0400_0000 != 0 {
                    let mask = arg as u8;
                    let reg = &mut self.isdio[addr];
                    *reg = (*reg & !mask) | (data[0] & mask);
                } else {
                    let len = (arg & 0x1FF) as usize + 1;
                    self.isdio[addr..addr + len].copy_from_slice(&data[..len]);
                }
            }
        }
    }

    fn receive(&mut self, byte: u8) {
        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::WriteWait { multi, target } => {
                self.mode = match (byte, multi) {
                    (0xFE, false) | (0xFC, true) => Mode::WriteData {
                        multi,
                        target,
                        data: Vec::with_capacity(SECTOR_SIZE + 2),
                    },
                    (0xFD, true) => {
                        self.busy = BUSY_BYTES;
                        Mode::Command
                    }
                    _ => Mode::WriteWait { multi, target },
                };
            }
            Mode::WriteData {
                multi,
                target,
                mut data,
            } => {
                data.push(byte);
                if data.len() < SECTOR_SIZE + 2 {
                    self.mode = Mode::WriteData { multi, target, data };
                    return;
                }
                self.commit(target, &data);
                self.out.push_back(0xE5);
                self.busy = BUSY_BYTES;
                self.mode = match target {
                    Target::Sector(sector) if multi => Mode::WriteWait {
                        multi,
                        target: Target::Sector(sector + 1),
                    },
                    _ => Mode::Command,
                };
            }
            mode => {
                self.mode = mode;
                if self.frame.is_empty() && byte & 0xC0 != 0x40 {
                    return;
                }
                self.frame.push(byte);
                if self.frame.len() == 6 {
                    let mut frame = [0u8; 6];
                    frame.copy_from_slice(&self.frame);
                    self.frame.clear();
                    self.command(frame);
                }
            }
        }
    }
}

impl Transport for SimCard {
    fn exchange(&mut self, out: u8) -> u8 {
        self.traffic += 1;
        if !self.selected || self.kind == Kind::Silent {
            return 0xFF;
        }

        if self.out.is_empty() {
            if let Mode::ReadMulti { next } = self.mode {
                self.mode = Mode::ReadMulti { next: next + 1 };
                self.queue_sector(next);
            }
        }
        let miso = match self.out.pop_front() {
            Some(byte) => byte,
            None if self.busy > 0 => {
                self.busy -= 1;
                0x00
            }
            None => 0xFF,
        };

        self.receive(out);
        miso
    }

    fn select(&mut self) {
        self.traffic += 1;
        self.selected = true;
    }

    fn deselect(&mut self) {
        self.traffic += 1;
        self.selected = false;
        self.out.clear();
        self.frame.clear();
        if matches!(self.mode, Mode::ReadMulti { .. }) {
            self.mode = Mode::Command;
        }
    }

    fn set_clock(&mut self, freq: HertzU32) {
        self.clock = Some(freq);
    }
}

/// Socket that records power switching.
#[derive(Debug, Default)]
pub struct PowerSocket {
    pub powered: bool,
    pub power_offs: u32,
}

impl Socket for PowerSocket {
    fn is_present(&mut self) -> bool {
        true
    }

    fn is_write_protected(&mut self) -> bool {
        false
    }

    fn power_on(&mut self) {
        self.powered = true;
    }

    fn power_off(&mut self) {
        self.powered = false;
        self.power_offs += 1;
    }
}

struct StopOnDrop<'a>(&'a AtomicBool);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Runs `f` while a background thread ticks `state` with `socket`.
///
/// Ticks come far faster than every 10 ms so that budgets measured in
/// seconds pass in milliseconds.
pub fn ticking<R>(state: &DiskState, socket: FixedSocket, f: impl FnOnce() -> R) -> R {
    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            let mut socket = socket;
            while !done.load(Ordering::Relaxed) {
                state.tick(&mut socket);
                std::thread::sleep(Duration::from_micros(200));
            }
        });
        let _stop = StopOnDrop(&done);
        f()
    })
}
