use tun::AsyncDevice;

/// TUN interface parameters
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub name: String,
    pub ip: String,
    pub mask: String,
    pub mtu: u16,
}

/// Creates the TUN interface, assigns its address, and brings it up
///
/// The returned device is owned directly by the caller's event loop; reads
/// and writes happen inline in its `select!` arms. Frames carry no
/// packet-info prefix, so the first byte of every read is the IP version
/// nibble.
pub fn create(cfg: &DeviceConfig) -> crate::Result<AsyncDevice> {
    let mut config = tun::Configuration::default();
    config
        .tun_name(cfg.name.clone())
        .address(cfg.ip.clone())
        .netmask(cfg.mask.clone())
        .mtu(cfg.mtu)
        .up();

    #[cfg(target_os = "linux")]
    config.platform_config(|config| {
        config.ensure_root_privileges(true);
    });

    let dev = tun::create_as_async(&config)?;
    tracing::info!("tun device {} up at {}/{}", cfg.name, cfg.ip, cfg.mask);
    Ok(dev)
}
