//! frame check sequence, the reversed CRC-8 of TS 07.10 (generator 0xE0)

const CODE_WORD: u8 = 0xE0;

/// what the shift register holds after a covered range plus its own FCS went through it
pub const CRC_VALID: u8 = 0xCF;

pub static CRC_TABLE: [u8; 256] = build_crc_table();

const fn build_crc_table() -> [u8; 256] {
    let mut table = [0u8; 256];

    let mut j = 0;
    while j < 256 {
        let mut data = j as u8;
        let mut sr = 0u8;

        let mut i = 0;
        while i < 8 {
            if (data & 1) ^ (sr & 1) != 0 {
                sr = (sr >> 1) ^ CODE_WORD;
            } else {
                sr >>= 1;
            }
            data >>= 1;
            i += 1;
        }

        table[j] = sr;
        j += 1;
    }

    table
}

fn run(seed: u8, data: &[u8]) -> u8 {
    data.iter().fold(seed, |fcs, b| CRC_TABLE[(fcs ^ b) as usize])
}

/// the FCS octet to append after `data`
#[must_use]
pub fn crc_calc(data: &[u8]) -> u8 {
    0xFF - run(0xFF, data)
}

/// checks `data` against the FCS octet that followed it on the wire
#[must_use]
pub fn crc_check(data: &[u8], fcs: u8) -> bool {
    CRC_TABLE[(run(0xFF, data) ^ fcs) as usize] == CRC_VALID
}
