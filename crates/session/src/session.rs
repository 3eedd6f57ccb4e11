//! Ruf-Sitzung – explizite Zustandsmaschine fuer genau einen Ruf
//!
//! Eine `CallSession` laeuft pro Client-Instanz und fuehrt hoechstens
//! einen Ruf gleichzeitig. Alle Eingaben – lokale Bedienung, Zustellungen
//! vom Server, Timeouts, Transport-Trennung – laufen als Ereignisse durch
//! EINE Queue und werden strikt nacheinander verarbeitet. Dadurch kann
//! insbesondere nie eine zweite Medienerfassung starten solange die erste
//! noch laeuft.
//!
//! ## Uebergaenge
//! - `Leerlauf -> Rufaufbau`: Medien erfassen, Angebot erzeugen, senden.
//!   Schlaegt die Erfassung fehl, bricht der Versuch nach Leerlauf ab –
//!   ein Ruf betritt Rufaufbau nie ohne lebende lokale Medien.
//! - `Leerlauf -> Klingelt`: Angebot merken, KEINE Medien erfassen
//!   (Kamera geht erst beim Annehmen an).
//! - `Klingelt -> Verbunden`: Medien erfassen, Antwort erzeugen, senden.
//! - `Klingelt -> Leerlauf`: Ablehnung senden, Angebot verwerfen.
//! - `Rufaufbau -> Verbunden`: Antwort der Gegenseite anwenden.
//! - jeder Zustand `-> Leerlauf`: Auflegen, Trennung, Ablehnung, Timeout.
//!   Der Abbau ist idempotent.
//!
//! Die Vermittlung garantiert keine Zustellung; Rufaufbau und Klingeln
//! tragen deshalb ein konfigurierbares Zeitlimit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use visavis_core::types::UserId;
use visavis_protocol::control::{
    CallAcceptRequest, CallInitiateRequest, CallRejectRequest, ControlPayload,
};

use crate::media::{MedienFehler, MedienQuelle, MedienStrom};
use crate::peer::{PeerFabrik, PeerVerbindung};

// ---------------------------------------------------------------------------
// Zustand & Ereignisse
// ---------------------------------------------------------------------------

/// Zustand der Ruf-Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RufZustand {
    /// Kein Ruf aktiv
    Leerlauf,
    /// Ausgehender Ruf, warte auf Annahme
    Rufaufbau,
    /// Eingehender Ruf, warte auf Benutzerentscheidung
    Klingelt,
    /// Ruf steht
    Verbunden,
}

impl std::fmt::Display for RufZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Leerlauf => "leerlauf",
            Self::Rufaufbau => "rufaufbau",
            Self::Klingelt => "klingelt",
            Self::Verbunden => "verbunden",
        };
        write!(f, "{}", s)
    }
}

/// Alle Ereignisse die die Sitzung verarbeitet
#[derive(Debug)]
pub enum SitzungsEreignis {
    // --- lokale Bedienung ---
    /// Benutzer startet einen Ruf
    RufStarten { ziel: UserId },
    /// Benutzer nimmt den klingelnden Ruf an
    Annehmen,
    /// Benutzer lehnt den klingelnden Ruf ab
    Ablehnen,
    /// Benutzer legt auf
    Auflegen,
    /// Mikrofon-Spur schalten (zustandserhaltend)
    MikrofonSetzen { aktiv: bool },
    /// Kamera-Spur schalten (zustandserhaltend)
    KameraSetzen { aktiv: bool },

    // --- Zustellungen vom Server ---
    /// Eingehender Ruf einer Gegenseite
    EingehenderRuf {
        von: UserId,
        anzeigename: String,
        angebot: serde_json::Value,
    },
    /// Gegenseite hat angenommen
    RufAngenommen { antwort: serde_json::Value },
    /// Gegenseite hat abgelehnt
    RufAbgelehnt,
    /// Rufziel war nicht erreichbar
    ZielUnerreichbar,

    // --- asynchrone Signale ---
    /// Transport zur Vermittlung ist weg – sofortiger Abbau
    TransportGetrennt,
    /// Zeitlimit fuer Rufaufbau/Klingeln abgelaufen
    ZeitUeberschritten { generation: u64 },
}

/// Benutzer-sichtbare Hinweise
///
/// Jeder Fehler und jedes Gegenseiten-Ergebnis wird dem Benutzer
/// gemeldet – nie still verschluckt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NutzerHinweis {
    /// Medien konnten nicht erfasst werden
    MedienProblem(MedienFehler),
    /// Peer-Verhandlung gescheitert
    VerhandlungGescheitert,
    /// Ruf laeuft bereits, zweiter Start abgelehnt
    BereitsBeschaeftigt,
    /// Gegenseite hat abgelehnt
    RufAbgelehnt,
    /// Rufziel nicht erreichbar
    ZielUnerreichbar,
    /// Zeitlimit abgelaufen
    RufZeitUeberschritten,
    /// Ruf beendet (aufgelegt)
    RufBeendet,
    /// Verbindung zur Vermittlung verloren
    VerbindungVerloren,
}

/// Konfiguration der Ruf-Sitzung
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Zeitlimit fuer Rufaufbau und Klingeln
    ///
    /// Die Vermittlung gibt keine Zustellgarantie; ohne Limit bliebe ein
    /// Rufer mit unerreichbarem Ziel unbegrenzt im Rufaufbau haengen.
    pub ruf_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ruf_timeout: Duration::from_secs(30),
        }
    }
}

/// Kanal-Enden fuer die Umgebung der Sitzung
pub struct SessionHandles {
    /// Ereignisse in die Sitzung einspeisen
    pub ereignisse: mpsc::UnboundedSender<SitzungsEreignis>,
    /// Ausgehende Signale an die Vermittlung
    pub signale: mpsc::UnboundedReceiver<ControlPayload>,
    /// Benutzer-sichtbare Hinweise
    pub hinweise: mpsc::UnboundedReceiver<NutzerHinweis>,
    /// Beobachtbarer Sitzungszustand (fuer die UI)
    pub zustand: watch::Receiver<RufZustand>,
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// Ruf-Sitzung – eine pro Client-Instanz
pub struct CallSession {
    zustand: RufZustand,
    eigene_id: UserId,
    eigener_name: String,
    config: SessionConfig,

    /// Gegenseite des aktuellen Rufs
    peer_user_id: Option<UserId>,
    peer_anzeigename: Option<String>,
    /// Beim Klingeln gemerktes Angebot, wird beim Annehmen verbraucht
    wartendes_angebot: Option<serde_json::Value>,

    /// Laufende lokale Medien
    medien: Option<Box<dyn MedienStrom>>,
    /// Laufende Peer-Verhandlung
    peer: Option<Box<dyn PeerVerbindung>>,
    mikrofon_aktiv: bool,
    kamera_aktiv: bool,

    /// Entwertet veraltete Timeout-Ereignisse frueherer Rufversuche
    timeout_generation: u64,

    medien_quelle: Arc<dyn MedienQuelle>,
    peer_fabrik: Arc<dyn PeerFabrik>,

    ereignis_rx: mpsc::UnboundedReceiver<SitzungsEreignis>,
    /// Schwacher Sender fuer Timer-Tasks; haelt die Queue nicht offen
    ereignis_tx: mpsc::WeakUnboundedSender<SitzungsEreignis>,
    signal_tx: mpsc::UnboundedSender<ControlPayload>,
    hinweis_tx: mpsc::UnboundedSender<NutzerHinweis>,
    zustand_tx: watch::Sender<RufZustand>,
}

impl CallSession {
    /// Erstellt eine neue Sitzung im Leerlauf
    pub fn neu(
        eigene_id: UserId,
        eigener_name: impl Into<String>,
        config: SessionConfig,
        medien_quelle: Arc<dyn MedienQuelle>,
        peer_fabrik: Arc<dyn PeerFabrik>,
    ) -> (Self, SessionHandles) {
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (hinweis_tx, hinweis_rx) = mpsc::unbounded_channel();
        let (zustand_tx, zustand_rx) = watch::channel(RufZustand::Leerlauf);

        let session = Self {
            zustand: RufZustand::Leerlauf,
            eigene_id,
            eigener_name: eigener_name.into(),
            config,
            peer_user_id: None,
            peer_anzeigename: None,
            wartendes_angebot: None,
            medien: None,
            peer: None,
            mikrofon_aktiv: true,
            kamera_aktiv: true,
            timeout_generation: 0,
            medien_quelle,
            peer_fabrik,
            ereignis_rx,
            ereignis_tx: ereignis_tx.downgrade(),
            signal_tx,
            hinweis_tx,
            zustand_tx,
        };

        let handles = SessionHandles {
            ereignisse: ereignis_tx,
            signale: signal_rx,
            hinweise: hinweis_rx,
            zustand: zustand_rx,
        };

        (session, handles)
    }

    /// Gibt den aktuellen Zustand zurueck
    pub fn zustand(&self) -> RufZustand {
        self.zustand
    }

    /// Verarbeitet Ereignisse bis alle Sender geschlossen sind
    ///
    /// Die einzige Konsumentenschleife der Sitzung: Ereignisse werden
    /// strikt nacheinander verarbeitet, auch suspendierende (Medien-
    /// erfassung) blockieren nachfolgende Ereignisse bis zum Abschluss.
    pub async fn laufen(mut self) {
        while let Some(ereignis) = self.ereignis_rx.recv().await {
            self.verarbeiten(ereignis).await;
        }
        // Sender weg: haengende Ressourcen nicht liegen lassen
        self.abbauen();
        tracing::debug!("Sitzungs-Schleife beendet");
    }

    /// Verarbeitet genau ein Ereignis
    pub async fn verarbeiten(&mut self, ereignis: SitzungsEreignis) {
        tracing::trace!(zustand = %self.zustand, ?ereignis, "Ereignis");

        match ereignis {
            SitzungsEreignis::RufStarten { ziel } => self.ruf_starten(ziel).await,
            SitzungsEreignis::Annehmen => self.annehmen().await,
            SitzungsEreignis::Ablehnen => self.ablehnen(),
            SitzungsEreignis::Auflegen => self.auflegen(),
            SitzungsEreignis::MikrofonSetzen { aktiv } => {
                self.mikrofon_aktiv = aktiv;
                if let Some(medien) = &mut self.medien {
                    medien.mikrofon_aktivieren(aktiv);
                }
            }
            SitzungsEreignis::KameraSetzen { aktiv } => {
                self.kamera_aktiv = aktiv;
                if let Some(medien) = &mut self.medien {
                    medien.kamera_aktivieren(aktiv);
                }
            }
            SitzungsEreignis::EingehenderRuf {
                von,
                anzeigename,
                angebot,
            } => self.eingehender_ruf(von, anzeigename, angebot),
            SitzungsEreignis::RufAngenommen { antwort } => self.ruf_angenommen(antwort).await,
            SitzungsEreignis::RufAbgelehnt => {
                self.gegenseite_weg(NutzerHinweis::RufAbgelehnt);
            }
            SitzungsEreignis::ZielUnerreichbar => {
                self.gegenseite_weg(NutzerHinweis::ZielUnerreichbar);
            }
            SitzungsEreignis::TransportGetrennt => {
                if self.zustand != RufZustand::Leerlauf {
                    self.abbauen();
                    self.hinweis(NutzerHinweis::VerbindungVerloren);
                }
            }
            SitzungsEreignis::ZeitUeberschritten { generation } => {
                self.zeit_ueberschritten(generation);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Uebergaenge
    // -----------------------------------------------------------------------

    /// `Leerlauf -> Rufaufbau`
    async fn ruf_starten(&mut self, ziel: UserId) {
        if self.zustand != RufZustand::Leerlauf {
            // Abgelehnt ohne Nebenwirkungen: keine zweite Erfassung,
            // kein zweites Angebot
            tracing::warn!(zustand = %self.zustand, "Rufstart im falschen Zustand abgelehnt");
            self.hinweis(NutzerHinweis::BereitsBeschaeftigt);
            return;
        }

        // Erst Medien, dann Zustand: Rufaufbau nie ohne lebende Medien
        let medien = match self.medien_quelle.erfassen().await {
            Ok(m) => m,
            Err(fehler) => {
                tracing::warn!(fehler = %fehler, "Medienerfassung fehlgeschlagen");
                self.hinweis(NutzerHinweis::MedienProblem(fehler));
                return;
            }
        };

        let (peer, angebot) = match self.peer_fabrik.ausgehend().await {
            Ok(paar) => paar,
            Err(fehler) => {
                tracing::warn!(fehler = %fehler, "Ausgehende Verhandlung fehlgeschlagen");
                let mut medien = medien;
                medien.stoppen();
                self.hinweis(NutzerHinweis::VerhandlungGescheitert);
                return;
            }
        };

        self.medien = Some(medien);
        self.spuren_anwenden();
        self.peer = Some(peer);
        self.peer_user_id = Some(ziel.clone());

        self.signal(ControlPayload::CallInitiate(CallInitiateRequest {
            target_user_id: ziel,
            signal_payload: angebot,
            from_user_id: self.eigene_id.clone(),
            from_display_name: self.eigener_name.clone(),
        }));

        self.zustand_setzen(RufZustand::Rufaufbau);
        self.timeout_starten();
    }

    /// `Leerlauf -> Klingelt`
    ///
    /// Medien werden hier bewusst NICHT erfasst – die Kamera geht erst an
    /// wenn der Benutzer annimmt.
    fn eingehender_ruf(&mut self, von: UserId, anzeigename: String, angebot: serde_json::Value) {
        if self.zustand != RufZustand::Leerlauf {
            // Besetzte Sitzung: Ruf ignorieren, der Rufer laeuft in sein
            // eigenes Zeitlimit
            tracing::debug!(von = %von, zustand = %self.zustand, "Eingehender Ruf waehrend Sitzung ignoriert");
            return;
        }

        self.peer_user_id = Some(von);
        self.peer_anzeigename = Some(anzeigename);
        self.wartendes_angebot = Some(angebot);
        self.zustand_setzen(RufZustand::Klingelt);
        self.timeout_starten();
    }

    /// `Klingelt -> Verbunden`
    async fn annehmen(&mut self) {
        if self.zustand != RufZustand::Klingelt {
            tracing::warn!(zustand = %self.zustand, "Annehmen im falschen Zustand ignoriert");
            return;
        }

        let medien = match self.medien_quelle.erfassen().await {
            Ok(m) => m,
            Err(fehler) => {
                // Bekannte Luecke: die Gegenseite erfaehrt davon nichts
                // automatisch und laeuft in ihr eigenes Zeitlimit
                tracing::warn!(fehler = %fehler, "Medienerfassung beim Annehmen fehlgeschlagen");
                self.abbauen();
                self.hinweis(NutzerHinweis::MedienProblem(fehler));
                return;
            }
        };

        let angebot = match self.wartendes_angebot.take() {
            Some(a) => a,
            None => {
                // Darf im Klingelt-Zustand nicht passieren
                tracing::error!("Klingelt ohne wartendes Angebot");
                let mut medien = medien;
                medien.stoppen();
                self.abbauen();
                return;
            }
        };

        let (peer, antwort) = match self.peer_fabrik.eingehend(angebot).await {
            Ok(paar) => paar,
            Err(fehler) => {
                tracing::warn!(fehler = %fehler, "Eingehende Verhandlung fehlgeschlagen");
                let mut medien = medien;
                medien.stoppen();
                self.abbauen();
                self.hinweis(NutzerHinweis::VerhandlungGescheitert);
                return;
            }
        };

        self.medien = Some(medien);
        self.spuren_anwenden();
        self.peer = Some(peer);

        let rufer = self
            .peer_user_id
            .clone()
            .unwrap_or_else(|| UserId::neu(""));
        self.signal(ControlPayload::CallAccept(CallAcceptRequest {
            target_user_id: rufer,
            signal_payload: antwort,
        }));

        self.timeout_entwerten();
        self.zustand_setzen(RufZustand::Verbunden);
    }

    /// `Klingelt -> Leerlauf` – lehnt ab ohne je Medien zu erfassen
    fn ablehnen(&mut self) {
        if self.zustand != RufZustand::Klingelt {
            tracing::warn!(zustand = %self.zustand, "Ablehnen im falschen Zustand ignoriert");
            return;
        }

        if let Some(rufer) = self.peer_user_id.clone() {
            self.signal(ControlPayload::CallReject(CallRejectRequest {
                target_user_id: rufer,
            }));
        }

        self.abbauen();
    }

    /// `Rufaufbau -> Verbunden`
    async fn ruf_angenommen(&mut self, antwort: serde_json::Value) {
        if self.zustand != RufZustand::Rufaufbau {
            tracing::debug!(zustand = %self.zustand, "Annahme ohne laufenden Rufaufbau ignoriert");
            return;
        }

        let ergebnis = match &mut self.peer {
            Some(peer) => peer.antwort_anwenden(antwort).await,
            None => {
                tracing::error!("Rufaufbau ohne Peer-Verhandlung");
                self.abbauen();
                return;
            }
        };

        if let Err(fehler) = ergebnis {
            // Verhandlungsfehler der externen Bibliothek zaehlt wie eine
            // Ablehnung durch die Gegenseite
            tracing::warn!(fehler = %fehler, "Antwort der Gegenseite nicht anwendbar");
            self.abbauen();
            self.hinweis(NutzerHinweis::VerhandlungGescheitert);
            return;
        }

        self.timeout_entwerten();
        self.zustand_setzen(RufZustand::Verbunden);
    }

    /// Ablehnung oder Unerreichbarkeit der Gegenseite
    fn gegenseite_weg(&mut self, hinweis: NutzerHinweis) {
        if self.zustand == RufZustand::Leerlauf {
            return;
        }
        self.abbauen();
        self.hinweis(hinweis);
    }

    /// `jeder Zustand -> Leerlauf` – idempotent
    fn auflegen(&mut self) {
        if self.zustand == RufZustand::Leerlauf {
            // Doppeltes Auflegen ist harmlos
            return;
        }
        self.abbauen();
        self.hinweis(NutzerHinweis::RufBeendet);
    }

    fn zeit_ueberschritten(&mut self, generation: u64) {
        if generation != self.timeout_generation {
            // Timer eines frueheren Rufversuchs
            tracing::trace!(generation, aktuell = self.timeout_generation, "Veralteter Timeout");
            return;
        }
        if !matches!(self.zustand, RufZustand::Rufaufbau | RufZustand::Klingelt) {
            return;
        }

        tracing::info!(zustand = %self.zustand, "Zeitlimit fuer Ruf abgelaufen");
        self.abbauen();
        self.hinweis(NutzerHinweis::RufZeitUeberschritten);
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    /// Baut Medien, Verhandlung und Sitzungsfelder ab und setzt Leerlauf
    ///
    /// Aus jedem Zustand erreichbar und beliebig oft aufrufbar.
    fn abbauen(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.schliessen();
        }
        if let Some(mut medien) = self.medien.take() {
            medien.stoppen();
        }
        self.peer_user_id = None;
        self.peer_anzeigename = None;
        self.wartendes_angebot = None;
        self.timeout_entwerten();
        self.zustand_setzen(RufZustand::Leerlauf);
    }

    /// Startet das Zeitlimit fuer den aktuellen Rufversuch
    fn timeout_starten(&mut self) {
        self.timeout_generation = self.timeout_generation.wrapping_add(1);
        let generation = self.timeout_generation;
        let dauer = self.config.ruf_timeout;
        let tx = self.ereignis_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(dauer).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SitzungsEreignis::ZeitUeberschritten { generation });
            }
        });
    }

    /// Entwertet alle laufenden Timeout-Timer
    fn timeout_entwerten(&mut self) {
        self.timeout_generation = self.timeout_generation.wrapping_add(1);
    }

    /// Uebertraegt die Mikrofon/Kamera-Schalter auf frisch erfasste Medien
    fn spuren_anwenden(&mut self) {
        if let Some(medien) = &mut self.medien {
            medien.mikrofon_aktivieren(self.mikrofon_aktiv);
            medien.kamera_aktivieren(self.kamera_aktiv);
        }
    }

    fn zustand_setzen(&mut self, neu: RufZustand) {
        if self.zustand != neu {
            tracing::debug!(von = %self.zustand, nach = %neu, "Zustandswechsel");
        }
        self.zustand = neu;
        let _ = self.zustand_tx.send(neu);
    }

    fn signal(&self, payload: ControlPayload) {
        if self.signal_tx.send(payload).is_err() {
            tracing::debug!("Signal-Kanal geschlossen (Verbindung weg)");
        }
    }

    fn hinweis(&self, hinweis: NutzerHinweis) {
        if self.hinweis_tx.send(hinweis).is_err() {
            tracing::debug!("Hinweis-Kanal geschlossen");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
