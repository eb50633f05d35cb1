/* wire representations used by the engine
*
* views over received bytes never rewrite them in place; owned headers are
* built in host order and serialized when a frame is produced
*/

mod ethernet;
mod ipv4;
pub mod option;

pub use self::ethernet::{Address as EthernetAddress, EtherType as EthernetType};

pub use self::ipv4::{
    Address as Ipv4Address, Flags as Ipv4Flags, Header as Ipv4Header, Packet as Ipv4Packet,
    Protocols as Ipv4Protocols, MAX_HEADER_LEN, MAX_OPTIONS_LEN, MAX_PACKET_LEN, MIN_HEADER_LEN,
};

pub use self::option::Options as Ipv4Options;
