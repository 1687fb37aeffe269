//! Static registry of Pyth price feed ids

const FEEDS: &[(&str, &str)] = &[
    // Crypto
    ("BTC", "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43"),
    ("ETH", "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace"),
    ("SOL", "ef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d"),
    ("XRP", "ec5d399846a9209f3fe5881d70aae9268c94339ff9817e8d18ff19fa05eea1c8"),
    // Equities
    ("AAPL", "49f6b65cb1de6b10eaf75e7c03ca029c306d0357e91b5311b175084a5ad55688"),
    ("TSLA", "16dad506d7db8da01c87581c87ca897a012a153557d4d578c3b9c9e1bc0632f1"),
    // FX and metals
    ("EURUSD", "a995d00bb36a63cef7fd2c287dc105fc8f3d93779f062f09551b0af3e81ec30b"),
    ("XAUUSD", "765d2ba906dbc32ca17cc11f5310a89e9ee1f6420508c63861f2f8ba4ee34bb2"),
];

/// Feed id (hex, no 0x prefix) for an asset symbol.
pub fn feed_id(asset: &str) -> Option<&'static str> {
    let symbol = asset.trim().to_uppercase().replace(['/', '-'], "");
    FEEDS
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, id)| *id)
}

/// All symbols with a registered feed
pub fn registered_assets() -> impl Iterator<Item = &'static str> {
    FEEDS.iter().map(|(name, _)| *name)
}
