//! Card identification (CID) and card-specific data (CSD) registers.
//!
//! Both registers are 128 bits wide and travel MSB first. The emulated card reports the
//! registers of a 2 GB class SDHC part; nothing here is derived from the configured capacity.

use serde::{Deserialize, Serialize};

/// Register image size in bytes.
pub const REGISTER_LEN: usize = 16;

const EMULATED_C_SIZE: u32 = 0x00_01D8;

/// Capacity advertised by [`Csd::EMULATED`], in 512-byte blocks.
pub const DEFAULT_CAPACITY_BLOCKS: u32 = (EMULATED_C_SIZE + 1) * 1024;

fn put(reg: &mut u128, lsb: u32, width: u32, value: u64) {
    let mask = (1u128 << width) - 1;
    *reg |= (u128::from(value) & mask) << lsb;
}

fn get(reg: u128, lsb: u32, width: u32) -> u64 {
    let mask = (1u128 << width) - 1;
    ((reg >> lsb) & mask) as u64
}

fn flag(reg: u128, bit: u32) -> bool {
    get(reg, bit, 1) != 0
}

/// Card identification register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cid {
    /// Manufacturer ID.
    pub mid: u8,
    /// OEM/application ID (two ASCII characters).
    pub oid: [u8; 2],
    /// Product name (five ASCII characters).
    pub pnm: [u8; 5],
    /// Product revision, BCD `n.m` packed as `n << 4 | m`.
    pub prv: u8,
    /// Product serial number.
    pub psn: u32,
    /// Manufacturing year, offset from 2000.
    pub mdt_year: u8,
    pub mdt_month: u8,
    pub crc: u8,
}

impl Cid {
    pub const EMULATED: Cid = Cid {
        mid: 0x03,
        oid: *b"SD",
        pnm: *b"SU02G",
        prv: 0x80,
        psn: 0x07D0_A2A8,
        mdt_year: 0x0A,
        mdt_month: 0x7,
        crc: 0x7F,
    };

    pub fn product_name(&self) -> String {
        String::from_utf8_lossy(&self.pnm).into_owned()
    }

    pub fn to_bytes(&self) -> [u8; REGISTER_LEN] {
        let mut reg = 0u128;
        put(&mut reg, 120, 8, self.mid.into());
        put(&mut reg, 104, 16, u16::from_be_bytes(self.oid).into());
        let mut pnm = [0u8; 8];
        pnm[3..].copy_from_slice(&self.pnm);
        put(&mut reg, 64, 40, u64::from_be_bytes(pnm));
        put(&mut reg, 56, 8, self.prv.into());
        put(&mut reg, 24, 32, self.psn.into());
        // [23:20] reserved
        put(&mut reg, 12, 8, self.mdt_year.into());
        put(&mut reg, 8, 4, self.mdt_month.into());
        put(&mut reg, 1, 7, self.crc.into());
        put(&mut reg, 0, 1, 1);
        reg.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8; REGISTER_LEN]) -> Self {
        let reg = u128::from_be_bytes(*bytes);
        let pnm = get(reg, 64, 40).to_be_bytes();
        Cid {
            mid: get(reg, 120, 8) as u8,
            oid: (get(reg, 104, 16) as u16).to_be_bytes(),
            pnm: [pnm[3], pnm[4], pnm[5], pnm[6], pnm[7]],
            prv: get(reg, 56, 8) as u8,
            psn: get(reg, 24, 32) as u32,
            mdt_year: get(reg, 12, 8) as u8,
            mdt_month: get(reg, 8, 4) as u8,
            crc: get(reg, 1, 7) as u8,
        }
    }
}

/// Card-specific data register, version 2.0 (high capacity) layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Csd {
    pub csd_structure: u8,
    pub taac: u8,
    pub nsac: u8,
    pub tran_speed: u8,
    /// Card command classes (12 bits).
    pub ccc: u16,
    pub read_bl_len: u8,
    pub read_bl_partial: bool,
    pub write_blk_misalign: bool,
    pub read_blk_misalign: bool,
    pub dsr_imp: bool,
    /// Device size (22 bits); capacity is `(c_size + 1) * 512 KiB`.
    pub c_size: u32,
    pub erase_blk_en: bool,
    pub sector_size: u8,
    pub wp_grp_size: u8,
    pub wp_grp_enable: bool,
    pub r2w_factor: u8,
    pub write_bl_len: u8,
    pub write_bl_partial: bool,
    pub file_format_grp: bool,
    pub copy: bool,
    pub perm_write_protect: bool,
    pub tmp_write_protect: bool,
    pub file_format: u8,
    pub crc: u8,
}

impl Csd {
    pub const EMULATED: Csd = Csd {
        csd_structure: 0x1,
        taac: 0x0E,
        nsac: 0x00,
        tran_speed: 0x32,
        ccc: 0xFFF,
        read_bl_len: 0x0A,
        read_bl_partial: false,
        write_blk_misalign: false,
        read_blk_misalign: false,
        dsr_imp: false,
        c_size: EMULATED_C_SIZE,
        erase_blk_en: true,
        sector_size: 0x7F,
        wp_grp_size: 0x00,
        wp_grp_enable: false,
        r2w_factor: 0x2,
        write_bl_len: 0x9,
        write_bl_partial: false,
        file_format_grp: false,
        copy: false,
        perm_write_protect: false,
        tmp_write_protect: false,
        file_format: 0x0,
        crc: 0x7F,
    };

    /// Capacity in 512-byte blocks implied by `c_size`.
    pub fn capacity_blocks(&self) -> u64 {
        (u64::from(self.c_size) + 1) * 1024
    }

    pub fn to_bytes(&self) -> [u8; REGISTER_LEN] {
        let mut reg = 0u128;
        put(&mut reg, 126, 2, self.csd_structure.into());
        put(&mut reg, 112, 8, self.taac.into());
        put(&mut reg, 104, 8, self.nsac.into());
        put(&mut reg, 96, 8, self.tran_speed.into());
        put(&mut reg, 84, 12, self.ccc.into());
        put(&mut reg, 80, 4, self.read_bl_len.into());
        put(&mut reg, 79, 1, self.read_bl_partial.into());
        put(&mut reg, 78, 1, self.write_blk_misalign.into());
        put(&mut reg, 77, 1, self.read_blk_misalign.into());
        put(&mut reg, 76, 1, self.dsr_imp.into());
        put(&mut reg, 48, 22, self.c_size.into());
        put(&mut reg, 46, 1, self.erase_blk_en.into());
        put(&mut reg, 39, 7, self.sector_size.into());
        put(&mut reg, 32, 7, self.wp_grp_size.into());
        put(&mut reg, 31, 1, self.wp_grp_enable.into());
        put(&mut reg, 26, 3, self.r2w_factor.into());
        put(&mut reg, 22, 4, self.write_bl_len.into());
        put(&mut reg, 21, 1, self.write_bl_partial.into());
        put(&mut reg, 15, 1, self.file_format_grp.into());
        put(&mut reg, 14, 1, self.copy.into());
        put(&mut reg, 13, 1, self.perm_write_protect.into());
        put(&mut reg, 12, 1, self.tmp_write_protect.into());
        put(&mut reg, 10, 2, self.file_format.into());
        put(&mut reg, 1, 7, self.crc.into());
        put(&mut reg, 0, 1, 1);
        reg.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8; REGISTER_LEN]) -> Self {
        let reg = u128::from_be_bytes(*bytes);
        Csd {
            csd_structure: get(reg, 126, 2) as u8,
            taac: get(reg, 112, 8) as u8,
            nsac: get(reg, 104, 8) as u8,
            tran_speed: get(reg, 96, 8) as u8,
            ccc: get(reg, 84, 12) as u16,
            read_bl_len: get(reg, 80, 4) as u8,
            read_bl_partial: flag(reg, 79),
            write_blk_misalign: flag(reg, 78),
            read_blk_misalign: flag(reg, 77),
            dsr_imp: flag(reg, 76),
            c_size: get(reg, 48, 22) as u32,
            erase_blk_en: flag(reg, 46),
            sector_size: get(reg, 39, 7) as u8,
            wp_grp_size: get(reg, 32, 7) as u8,
            wp_grp_enable: flag(reg, 31),
            r2w_factor: get(reg, 26, 3) as u8,
            write_bl_len: get(reg, 22, 4) as u8,
            write_bl_partial: flag(reg, 21),
            file_format_grp: flag(reg, 15),
            copy: flag(reg, 14),
            perm_write_protect: flag(reg, 13),
            tmp_write_protect: flag(reg, 12),
            file_format: get(reg, 10, 2) as u8,
            crc: get(reg, 1, 7) as u8,
        }
    }
}
