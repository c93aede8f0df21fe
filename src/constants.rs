//! Shared constants: explorer links, token addresses, staking program table.

/// Crate version, injected at build time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Block explorer base URL for the home chain (Gnosis)
pub const EXPLORER_URL: &str = "https://gnosisscan.io";

/// Reward token (OLAS) contract on Gnosis
pub const TOKEN_ADDRESS: &str = "0xcE11e14225575945b8E6Dc0D4F2dD4C570f79d9f";

/// Wrapped native asset (wxDAI) contract on Gnosis
pub const WRAPPED_NATIVE_ADDRESS: &str = "0xe91D153E0b41518A2Ce8Dd3D7944Fa863463a97d";

pub const NATIVE_SYMBOL: &str = "xDAI";
pub const WRAPPED_NATIVE_SYMBOL: &str = "wxDAI";
pub const TOKEN_SYMBOL: &str = "OLAS";

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/config.toml";

/// Default schedule checkpoint file path
pub const CHECKPOINT_FILE_PATH: &str = "data/checkpoints.json";

/// Build an explorer link for an address
pub fn address_url(address: &str) -> String {
    format!("{}/address/{}", EXPLORER_URL, address)
}

/// Build an explorer link for a transaction hash
pub fn tx_url(tx_hash: &str) -> String {
    format!("{}/tx/{}", EXPLORER_URL, tx_hash)
}

/// A known staking program and its slot capacity
#[derive(Debug, Clone, Copy)]
pub struct StakingProgram {
    pub name: &'static str,
    pub address: &'static str,
    pub slots: u64,
}

/// Known staking programs on the home chain, used for slot reporting and
/// for naming the program an instance is staked in.
pub const STAKING_PROGRAMS: &[StakingProgram] = &[
    StakingProgram {
        name: "Hobbyist (100 OLAS)",
        address: "0x389b46c259631acd6a69bde8b6cee218230bae8c",
        slots: 100,
    },
    StakingProgram {
        name: "Hobbyist 2 (500 OLAS)",
        address: "0x238eb6993b90a978ec6aad7530d6429c949c08da",
        slots: 50,
    },
    StakingProgram {
        name: "Expert (1k OLAS)",
        address: "0x5344b7dd311e5d3dddd46a4f71481bd7b05aaa3e",
        slots: 20,
    },
    StakingProgram {
        name: "Expert 2 (1k OLAS)",
        address: "0xb964e44c126410df341ae04b13ab10a985fe3513",
        slots: 40,
    },
    StakingProgram {
        name: "Expert 3 (2k OLAS)",
        address: "0x80fad33cadb5f53f9d29f02db97d682e8b101618",
        slots: 20,
    },
    StakingProgram {
        name: "Expert 4 (10k OLAS)",
        address: "0xad9d891134443b443d7f30013c7e14fe27f2e029",
        slots: 26,
    },
    StakingProgram {
        name: "Expert 5 (10k OLAS)",
        address: "0xe56df1e563de1b10715cb313d514af350d207212",
        slots: 26,
    },
    StakingProgram {
        name: "Expert 6 (1k OLAS)",
        address: "0x2546214aee7eea4bee7689c81231017ca231dc93",
        slots: 40,
    },
    StakingProgram {
        name: "Expert 7 (10k OLAS)",
        address: "0xd7a3c8b975f71030135f1a66e9e23164d54ff455",
        slots: 26,
    },
];

/// Look up the display name of a staking program by contract address
pub fn staking_program_name(address: &str) -> Option<&'static str> {
    STAKING_PROGRAMS
        .iter()
        .find(|p| p.address.eq_ignore_ascii_case(address))
        .map(|p| p.name)
}
