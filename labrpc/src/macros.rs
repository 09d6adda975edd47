/// Declare an RPC service.
///
/// Expands to a module holding the wire `Request` enum, a `Service` trait to be
/// implemented by the handler type, a `Client` stub and a `Server` driving a
/// shared `Service` from its request queue.
#[macro_export]
macro_rules! service {
    () => {
        compile_error!("empty service is not allowed");
    };
    (
        $(#[$service_attr:meta])*
        service $svc_name:ident {
            $(
                $(#[$method_attr:meta])*
                fn $method_name:ident($($arg_id:ident: $arg_ty:ty),*) -> $output:ty;
            )*
        }
    ) => {
        #[allow(missing_docs)]
        $(#[$service_attr])*
        pub mod $svc_name {
            use super::*;

            use std::sync::Arc;

            use $crate::network::NetworkPackage;
            use $crate::{server, client};

            use $crate::tokio::sync::mpsc::{self, Sender, Receiver};
            use $crate::serde_json;
            use $crate::serde::{Serialize, Deserialize};
            use $crate::anyhow::{Result, anyhow};
            use $crate::async_trait;
            use $crate::log::{error, trace};


            #[derive(Debug, Deserialize, Serialize)]
            pub enum Request {
                $(
                    #[allow(non_camel_case_types)]
                    $method_name {  $($arg_id : $arg_ty),* }
                ),*
            }

            mod response {
                use super::*;
                $(
                    #[derive(Deserialize, Serialize)]
                    #[allow(non_camel_case_types)]
                    pub struct $method_name {
                        pub data: std::result::Result<$output, String>
                    }
                )*
            }

            #[async_trait]
            pub trait Service: Send + Sync + 'static {
                $(
                    $(#[$method_attr])*
                    async fn $method_name(&self, $($arg_id : $arg_ty),* ) -> Result<$output>;
                )*
            }

            #[derive(Debug, Clone)]
            pub struct Client {
                server_id: String,
                tx: Sender<NetworkPackage>,
            }

            impl Client {

                $(
                    pub async fn $method_name(&self, $($arg_id : $arg_ty),* ) -> Result<$output> {
                        let req = Request::$method_name {
                            $($arg_id),*
                        };
                        let resp = self.call(serde_json::to_string(&req)?).await?;
                        let resp: response::$method_name = serde_json::from_str(&resp)?;
                        resp.data.map_err(|e| anyhow!("{}: {}", self.server_id, e))
                    }
                )*

                pub fn server_id(&self) -> &str {
                    &self.server_id
                }

                pub async fn call(&self, req: String) -> Result<String> {
                    let (tx, mut rx) = mpsc::channel(1);
                    let package = NetworkPackage {
                        to: self.server_id.clone(),
                        reply: tx,
                        data: req.clone(),
                    };
                    self.tx.send(package).await?;
                    if let Some(resp) = rx.recv().await {
                        trace!("req: {}, resp: {}", req, &resp);
                        Ok(resp)
                    } else {
                        Err(anyhow!("unable to receive from server {}", self.server_id))
                    }
                }
            }

            impl client::Client for Client {
                fn from_server(server_id: String, net_tx: Sender<NetworkPackage>) -> Self {
                    Self {
                        server_id,
                        tx: net_tx,
                    }
                }
            }

            #[derive(Debug)]
            pub struct Server<T: Service> {
                svc: Arc<T>,
                tx: Sender<NetworkPackage>,
                rx: Receiver<NetworkPackage>,
            }

            #[async_trait]
            impl<T: Service> server::Server for Server<T> {
                type Service = T;

                fn from_service(svc: Arc<Self::Service>) -> Self {
                    let (tx, rx) = mpsc::channel(100);
                    Self {svc, tx, rx}
                }

                fn client_chan(&self) -> Sender<NetworkPackage> {
                    self.tx.clone()
                }

                async fn handle(&mut self) -> Result<()> {

                    match self.rx.recv().await {
                        Some(NetworkPackage{reply, data, ..}) => {
                            trace!("handle recv: {}", &data);
                            let req: Request = match serde_json::from_str(&data) {
                                Ok(req) => req,
                                Err(e) => {
                                    error!("malformed request {:?}: {}", data, e);
                                    return Ok(());
                                }
                            };
                            let svc = self.svc.clone();
                            $crate::tokio::spawn(async move {
                                let resp = match req {
                                    $(
                                        Request::$method_name { $($arg_id),* } => {
                                            let data = svc
                                                .$method_name($($arg_id),* )
                                                .await
                                                .map_err(|e| e.to_string());
                                            serde_json::to_string(&response::$method_name { data })
                                        }
                                    )*
                                };
                                match resp {
                                    Ok(resp) => {
                                        trace!("handle send: {}", &resp);
                                        if reply.send(resp).await.is_err() {
                                            trace!("caller went away before the reply");
                                        }
                                    }
                                    Err(e) => error!("unable to encode response: {}", e),
                                }
                            });
                            Ok(())
                        }
                        None => {Err(anyhow!("expected sender"))}
                    }
                }
            }
        }
    };
}
