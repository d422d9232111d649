use std::net::Ipv4Addr;

use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::A;
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use log::{debug, error};

use crate::host_table::AHostTable;
use crate::upstream::AUpstreamResolver;

/// TTL of every A record we hand out.
pub const ANSWER_TTL: u32 = 60;

/// What a question turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Local(Ipv4Addr),
    Upstream(Ipv4Addr),
    Unresolved,
    Unsupported,
}

/// Answers A questions from the host table, falling back to upstream nameservers.
///
/// Never writes to the table, upstream answers are not cached.
pub struct QueryHandler {
    table: AHostTable,
    upstream: AUpstreamResolver,
}

impl QueryHandler {
    pub fn new(table: AHostTable, upstream: AUpstreamResolver) -> Self {
        Self { table, upstream }
    }

    pub async fn answer(&self, name: &str, query_type: RecordType) -> Answer {
        if query_type != RecordType::A {
            return Answer::Unsupported;
        }
        let host = name.trim_end_matches('.');
        if let Some(ip) = self.table.lookup(host) {
            debug!("dns server parse {host} ip {ip}");
            return Answer::Local(ip);
        }
        match self.upstream.resolve(host).await {
            Ok(resolved) => {
                debug!(
                    "{host} resolved upstream to {} after {} failed attempt(s)",
                    resolved.address,
                    resolved.failures.len()
                );
                Answer::Upstream(resolved.address)
            }
            Err(e) => {
                debug!("no ip found for {host}: {e}");
                Answer::Unresolved
            }
        }
    }
}

fn a_record(name: Name, ip: Ipv4Addr) -> Record {
    Record::from_rdata(name, ANSWER_TTL, RData::A(A(ip)))
}

#[async_trait::async_trait]
impl RequestHandler for QueryHandler {
    async fn handle_request<R: ResponseHandler>(&self, request: &Request, mut response_handle: R) -> ResponseInfo {
        // hickory lowercases `query()`, table keys are matched as asked
        let query = request.query().original();
        let answer = self.answer(&query.name().to_string(), query.query_type()).await;

        let mut header = Header::response_from_request(request.header());
        let builder = MessageResponseBuilder::from_message_request(request);
        let sent = match answer {
            Answer::Local(ip) | Answer::Upstream(ip) => {
                header.set_authoritative(true);
                let records = [a_record(query.name().clone(), ip)];
                let response = builder.build(
                    header,
                    records.iter(),
                    std::iter::empty(),
                    std::iter::empty(),
                    std::iter::empty(),
                );
                response_handle.send_response(response).await
            }
            Answer::Unresolved => {
                header.set_response_code(ResponseCode::ServFail);
                response_handle.send_response(builder.build_no_records(header)).await
            }
            Answer::Unsupported => {
                response_handle.send_response(builder.build_no_records(header)).await
            }
        };

        match sent {
            Ok(info) => info,
            Err(e) => {
                error!("dns response send error: {e}");
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use hickory_server::proto::op::{Message, MessageType, OpCode, Query};
    use hickory_resolver::error::ResolveError;
    use hickory_server::ServerFuture;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::host_table::{HostRecord, HostTable};
    use crate::upstream::{ServerLookup, UpstreamResolver};

    const LISTEN: Ipv4Addr = Ipv4Addr::LOCALHOST;

    fn handler() -> QueryHandler {
        let table = Arc::new(HostTable::new());
        table.update(vec![HostRecord::new("web.mypod", Ipv4Addr::new(10, 1, 2, 3))]);
        QueryHandler::new(table, Arc::new(UpstreamResolver::new(LISTEN)))
    }

    struct RefusingLookup;

    #[async_trait::async_trait]
    impl ServerLookup for RefusingLookup {
        async fn ipv4_lookup(&self, _server: IpAddr, _host: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
            Err(ResolveError::from("refused"))
        }
    }

    async fn ask(server: SocketAddr, name: &str, query_type: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(4242)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), query_type));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&msg.to_vec().unwrap(), server).await.unwrap();
        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Message::from_vec(&buf[..n]).unwrap()
    }

    async fn serve(handler: QueryHandler) -> (SocketAddr, ServerFuture<QueryHandler>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let mut server = ServerFuture::new(handler);
        server.register_socket(socket);
        (addr, server)
    }

    #[tokio::test]
    async fn test_answer_decisions() {
        let handler = handler();
        assert_eq!(handler.answer("web.mypod.", RecordType::A).await, Answer::Local(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(handler.answer("web.mypod", RecordType::AAAA).await, Answer::Unsupported);
        assert_eq!(handler.answer("unknown.host.", RecordType::A).await, Answer::Unresolved);
    }

    #[tokio::test]
    async fn test_local_hit_on_the_wire() {
        let (addr, _server) = serve(handler()).await;
        let resp = ask(addr, "web.mypod.", RecordType::A).await;

        assert_eq!(resp.id(), 4242);
        assert!(resp.authoritative());
        assert_eq!(resp.response_code(), ResponseCode::NoError);
        assert_eq!(resp.answers().len(), 1);
        let record = &resp.answers()[0];
        assert_eq!(record.ttl(), ANSWER_TTL);
        assert_eq!(record.name().to_ascii(), "web.mypod.");
        match record.data() {
            Some(RData::A(a)) => assert_eq!(IpAddr::V4(a.0), IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))),
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_miss_without_upstream_is_empty() {
        let (addr, _server) = serve(handler()).await;
        let resp = ask(addr, "unknown.host.", RecordType::A).await;
        assert!(resp.answers().is_empty());
        assert_eq!(resp.response_code(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn test_non_a_question_is_empty() {
        let (addr, _server) = serve(handler()).await;
        let resp = ask(addr, "web.mypod.", RecordType::TXT).await;
        assert!(resp.answers().is_empty());
        assert_eq!(resp.response_code(), ResponseCode::NoError);
    }

    #[tokio::test]
    async fn test_mixed_case_host_on_the_wire() {
        let table = Arc::new(HostTable::new());
        table.update(vec![HostRecord::new("web.MyPod", Ipv4Addr::new(10, 1, 2, 4))]);
        let handler = QueryHandler::new(table, Arc::new(UpstreamResolver::new(LISTEN)));
        let (addr, _server) = serve(handler).await;

        let resp = ask(addr, "web.MyPod.", RecordType::A).await;
        assert_eq!(resp.response_code(), ResponseCode::NoError);
        assert_eq!(resp.answers().len(), 1);
        let record = &resp.answers()[0];
        assert_eq!(record.name().to_ascii(), "web.MyPod.");
        match record.data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::new(10, 1, 2, 4)),
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_miss_with_failing_upstream_is_empty() {
        let table = Arc::new(HostTable::new());
        let upstream = Arc::new(UpstreamResolver::with_lookup(LISTEN, Box::new(RefusingLookup)));
        upstream.set_nameservers(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53))]);
        let handler = QueryHandler::new(table, upstream);
        assert_eq!(handler.answer("unknown.host.", RecordType::A).await, Answer::Unresolved);

        let (addr, _server) = serve(handler).await;
        let resp = ask(addr, "unknown.host.", RecordType::A).await;
        assert!(resp.answers().is_empty());
        assert_eq!(resp.response_code(), ResponseCode::ServFail);
    }
}
