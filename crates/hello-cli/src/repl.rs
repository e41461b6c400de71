//! Menu-driven session over any line reader and writer.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tonic::Status;
use tonic::metadata::MetadataMap;

use hello_grpc::metadata;
use hello_grpc::{ClientStream, GreeterClient, HelloRequest, StatusReport};

const MENU: &str = "1: send Request\n\
                    2: HelloServerStream\n\
                    3: HelloClientStream\n\
                    4: HelloBiStream\n\
                    5: exit\n";

const PROMPT: &str = "please enter >";
const NAME_PROMPT: &str = "please enter your name >";

/// An entry of the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    /// `1`: unary `Hello`.
    Hello,
    /// `2`: `HelloServerStream`.
    ServerStream,
    /// `3`: `HelloClientStream`.
    ClientStream,
    /// `4`: `HelloBiStreams`.
    BiStreams,
    /// `5`: leave the session.
    Exit,
}

impl MenuChoice {
    /// Parse one input line; anything unknown is `None`.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Hello),
            "2" => Some(Self::ServerStream),
            "3" => Some(Self::ClientStream),
            "4" => Some(Self::BiStreams),
            "5" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Interactive session against one [`GreeterClient`].
///
/// Call failures are printed and the menu comes back. Only I/O errors on
/// the reader or writer end the session early.
#[derive(Debug)]
pub struct Repl<R, W> {
    client: GreeterClient,
    input: R,
    output: W,
    names_per_stream: usize,
}

impl<R, W> Repl<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a session reading from `input` and printing to `output`.
    pub fn new(client: GreeterClient, input: R, output: W) -> Self {
        Self {
            client,
            input,
            output,
            names_per_stream: 5,
        }
    }

    /// Names read for each client-stream and bidi-stream call.
    pub fn names_per_stream(mut self, names: usize) -> Self {
        self.names_per_stream = names.max(1);
        self
    }

    /// Give back the writer, e.g. to inspect what a test session printed.
    pub fn into_output(self) -> W {
        self.output
    }

    /// Show the menu until `5` or end of input.
    pub async fn run(&mut self) -> hello_grpc::Result<()> {
        loop {
            self.write(MENU).await?;
            self.write(PROMPT).await?;
            let Some(line) = self.read_line().await? else {
                return Ok(());
            };
            match MenuChoice::parse(&line) {
                Some(MenuChoice::Hello) => self.hello().await?,
                Some(MenuChoice::ServerStream) => self.server_stream().await?,
                Some(MenuChoice::ClientStream) => self.client_stream().await?,
                Some(MenuChoice::BiStreams) => self.bi_streams().await?,
                Some(MenuChoice::Exit) => {
                    self.writeln("exit").await?;
                    return Ok(());
                }
                None => {}
            }
        }
    }

    async fn hello(&mut self) -> hello_grpc::Result<()> {
        self.write(NAME_PROMPT).await?;
        let Some(name) = self.read_line().await? else {
            return Ok(());
        };

        let request_metadata = metadata::from_pairs(&[("type", "unary")])?;
        match self.client.hello(name, request_metadata).await {
            Ok(reply) => {
                self.writeln(&metadata::display(&reply.header)).await?;
                self.writeln(&metadata::display(&reply.trailer)).await?;
                self.writeln(&format!("Greeting: {}", reply.message.message))
                    .await
            }
            Err(status) => self.report(&status).await,
        }
    }

    async fn server_stream(&mut self) -> hello_grpc::Result<()> {
        self.writeln(NAME_PROMPT).await?;
        let Some(name) = self.read_line().await? else {
            return Ok(());
        };

        let mut stream = match self
            .client
            .hello_server_stream(name, MetadataMap::new())
            .await
        {
            Ok(stream) => stream,
            Err(status) => return self.report(&status).await,
        };
        loop {
            match stream.recv().await {
                Ok(Some(response)) => self.writeln(&response.message).await?,
                Ok(None) => {
                    return self
                        .writeln("all the responses have already received.")
                        .await;
                }
                Err(status) => return self.report(&status).await,
            }
        }
    }

    async fn client_stream(&mut self) -> hello_grpc::Result<()> {
        let mut stream = match self.client.hello_client_stream(MetadataMap::new()).await {
            Ok(stream) => stream,
            Err(status) => return self.report(&status).await,
        };

        self.writeln(&format!("Please enter {} names.", self.names_per_stream))
            .await?;
        for _ in 0..self.names_per_stream {
            let Some(name) = self.read_line().await? else {
                break;
            };
            if let Err(status) = stream.send(HelloRequest { name }).await {
                return self.report(&status).await;
            }
        }

        match close_and_recv(&mut stream).await {
            Ok(Some(response)) => {
                self.writeln(&format!("Greeting: {}", response.message))
                    .await
            }
            Ok(None) => self.writeln("no greeting received").await,
            Err(status) => self.report(&status).await,
        }
    }

    async fn bi_streams(&mut self) -> hello_grpc::Result<()> {
        let request_metadata = metadata::from_pairs(&[("type", "stream")])?;
        let mut stream = match self.client.hello_bi_streams(request_metadata).await {
            Ok(stream) => stream,
            Err(status) => return self.report(&status).await,
        };

        self.writeln(&format!("Please enter {} names.", self.names_per_stream))
            .await?;
        let mut sent = 0;
        let mut send_done = false;
        let mut header_shown = false;
        loop {
            if !send_done {
                match self.read_line().await? {
                    Some(name) => {
                        if let Err(status) = stream.send(HelloRequest { name }).await {
                            return self.report(&status).await;
                        }
                        sent += 1;
                        send_done = sent == self.names_per_stream;
                    }
                    None => send_done = true,
                }
                if send_done && let Err(status) = stream.close().await {
                    return self.report(&status).await;
                }
            }

            if !header_shown {
                header_shown = true;
                match stream.header().await {
                    Ok(header) => self.writeln(&metadata::display(&header)).await?,
                    Err(status) => return self.report(&status).await,
                }
            }

            match stream.recv().await {
                Ok(Some(response)) => self.writeln(&response.message).await?,
                Ok(None) => break,
                Err(status) => return self.report(&status).await,
            }
        }

        self.writeln(&metadata::display(&stream.trailer())).await
    }

    /// Read one line without its terminator; `None` at end of input.
    async fn read_line(&mut self) -> hello_grpc::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn write(&mut self, text: &str) -> hello_grpc::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn writeln(&mut self, text: &str) -> hello_grpc::Result<()> {
        self.write(text).await?;
        self.write("\n").await
    }

    async fn report(&mut self, status: &Status) -> hello_grpc::Result<()> {
        tracing::debug!(code = ?status.code(), message = status.message(), "call failed");
        self.writeln(&StatusReport::from(status).to_string()).await
    }
}

/// Half-close a client stream and read its single response.
async fn close_and_recv(
    stream: &mut ClientStream,
) -> Result<Option<hello_grpc::HelloResponse>, Status> {
    stream.close().await?;
    let response = stream.recv().await?;
    // Reaching end-of-input lets the trailer arrive.
    if response.is_some() {
        stream.recv().await?;
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_choice_parse() {
        assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::Hello));
        assert_eq!(MenuChoice::parse(" 4 "), Some(MenuChoice::BiStreams));
        assert_eq!(MenuChoice::parse("5"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse(""), None);
        assert_eq!(MenuChoice::parse("6"), None);
        assert_eq!(MenuChoice::parse("exit"), None);
    }

    #[test]
    fn test_menu_lists_every_choice() {
        for entry in [
            "1: send Request",
            "2: HelloServerStream",
            "3: HelloClientStream",
            "4: HelloBiStream",
            "5: exit",
        ] {
            assert!(MENU.lines().any(|line| line == entry), "{entry}");
        }
    }
}
