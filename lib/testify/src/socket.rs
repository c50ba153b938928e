use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

/// Asks the OS for a free TCP port on `ip`. Nothing listens on the returned
/// address, which makes it handy for "connection refused" cases too.
pub fn next_addr_for_ip(ip: IpAddr) -> SocketAddr {
    let listener = TcpListener::bind(SocketAddr::new(ip, 0)).expect("bind to a random port");
    listener.local_addr().expect("get local address of listener")
}

pub fn next_addr() -> SocketAddr {
    next_addr_for_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
